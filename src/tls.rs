//! TLS 证书加载与自签名生成。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use tracing::info;

use crate::config::Args;

/// 证书与私钥必须同时提供或同时省略。
fn pem_files(args: &Args) -> Result<Option<(&str, &str)>, std::io::Error> {
    match (args.tls_cert.as_deref(), args.tls_key.as_deref()) {
        (Some(cert), Some(key)) => Ok(Some((cert, key))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "--tls-cert given without --tls-key",
        )),
        (None, Some(_)) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "--tls-key given without --tls-cert",
        )),
    }
}

/// 构建 Rustls 配置：提供了证书与私钥时从文件加载，否则在内存中生成自签名证书。
pub async fn build_rustls_config(
    args: &Args,
    host: IpAddr,
) -> Result<RustlsConfig, std::io::Error> {
    if let Some((cert, key)) = pem_files(args)? {
        return RustlsConfig::from_pem_file(cert, key).await;
    }

    let mut names = vec![host.to_string()];
    if host.is_loopback() || host.is_unspecified() {
        names.push("localhost".to_string());
    }
    let cert = generate_simple_self_signed(names)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    info!(%host, "using generated self-signed certificate");
    RustlsConfig::from_pem(
        cert.cert.pem().into_bytes(),
        cert.key_pair.serialize_pem().into_bytes(),
    )
    .await
}
