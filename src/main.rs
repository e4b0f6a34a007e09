//! pano-drop server binary: builds the Axum router and starts the listeners.

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use pano_drop::config::{Args, SHUTDOWN_GRACE_SECS, UPLOAD_URL_PREFIX};
use pano_drop::http::{self, build_cors_layer};
use pano_drop::storage::Storage;
use pano_drop::viewer::SourcePolicy;
use pano_drop::{frontend, logging, tls, upload, version, viewer};

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let motion = Arc::new(
        args.motion
            .to_config()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?,
    );
    let storage = Arc::new(Storage::new(PathBuf::from(&args.uploads_dir)));
    storage.ensure_root().await?;
    info!(dir = ?storage.root_path(), "uploads directory ready");
    let policy = Arc::new(match args.sandbox_root.as_deref() {
        Some(root) => SourcePolicy::sandboxed(PathBuf::from(root)),
        None => SourcePolicy::unrestricted(),
    });
    if !policy.is_sandboxed() {
        warn!("no sandbox root configured: /viewer and /process_stitched_image can read any file");
    }

    let mut app = Router::new()
        .route("/", get(frontend::index).post(upload::upload_form))
        .route(
            &format!("{UPLOAD_URL_PREFIX}/{{filename}}"),
            get(upload::serve_upload),
        )
        .route("/viewer/{*filepath}", get(viewer::serve_arbitrary))
        .route("/process_stitched_image", post(upload::finalize_stitched))
        .route("/assets/{*path}", get(frontend::serve_asset))
        .route("/api/motion", get(frontend::motion_config))
        .route("/api/version", get(version::get_version_info))
        .layer(DefaultBodyLimit::max(args.upload_max_size))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = http::client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(policy))
        .layer(Extension(motion));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    let https = match args.https_port {
        Some(port) => Some((
            SocketAddr::new(host, port),
            tls::build_rustls_config(&args, host).await?,
        )),
        None => None,
    };

    info!("Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());
    let https_server = {
        let handle = handle.clone();
        async move {
            match https {
                Some((https_addr, tls_config)) => {
                    info!("Starting HTTPS server at {}", https_addr);
                    axum_server::bind_rustls(https_addr, tls_config)
                        .handle(handle)
                        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                        .await
                }
                None => std::future::pending::<std::io::Result<()>>().await,
            }
        }
    };

    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
