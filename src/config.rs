//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;
use crate::motion::{self, MotionConfig};

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const UPLOAD_URL_PREFIX: &str = "/static/uploads";
pub const STITCHED_FILENAME: &str = "stitched_latest.jpg";
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
pub const DEFAULT_UPLOADS_DIR: &str = "static/uploads";
pub const DEFAULT_UPLOAD_MAX_SIZE: usize = 64 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "pano-drop", version = VERSION_INFO, about = "Panorama upload server and viewer")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "PANO_UPLOADS_DIR",
        default_value = DEFAULT_UPLOADS_DIR,
        help = "Directory holding uploaded images"
    )]
    pub uploads_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "PANO_BIND",
        default_value = "127.0.0.1",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PANO_HTTP_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "PANO_HTTPS_PORT",
        help = "HTTPS port (HTTPS is disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "PANO_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "PANO_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "PANO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "PANO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes"
    )]
    pub upload_max_size: usize,
    #[arg(
        long,
        env = "PANO_SANDBOX_ROOT",
        help = "Confine /viewer and stitched-image sources to this directory"
    )]
    pub sandbox_root: Option<String>,
    #[command(flatten)]
    pub motion: MotionArgs,
}

/// Movement tunables shipped to the viewer page.
#[derive(clap::Args, Debug, Clone)]
pub struct MotionArgs {
    #[arg(long, env = "PANO_FORWARD_ACCELERATION", default_value_t = motion::DEFAULT_FORWARD_ACCELERATION)]
    pub forward_acceleration: f32,
    #[arg(long, env = "PANO_BACKWARD_ACCELERATION", default_value_t = motion::DEFAULT_BACKWARD_ACCELERATION)]
    pub backward_acceleration: f32,
    #[arg(long, env = "PANO_MAX_SPEED", default_value_t = motion::DEFAULT_MAX_SPEED)]
    pub max_speed: f32,
    #[arg(long, env = "PANO_FRICTION", default_value_t = motion::DEFAULT_FRICTION)]
    pub friction: f32,
    #[arg(long, env = "PANO_IDLE_FRICTION", default_value_t = motion::DEFAULT_IDLE_FRICTION)]
    pub idle_friction: f32,
    #[arg(long, env = "PANO_ROTATION_SPEED", default_value_t = motion::DEFAULT_ROTATION_SPEED)]
    pub rotation_speed: f32,
    #[arg(long, env = "PANO_MOVE_SPEED", default_value_t = motion::DEFAULT_MOVE_SPEED)]
    pub move_speed: f32,
    #[arg(long, env = "PANO_ZOOM_SPEED", default_value_t = motion::DEFAULT_ZOOM_SPEED)]
    pub zoom_speed: f32,
    #[arg(long, env = "PANO_BOB_AMPLITUDE", default_value_t = motion::DEFAULT_BOB_AMPLITUDE)]
    pub bob_amplitude: f32,
    #[arg(long, env = "PANO_DRAG_FACTOR", default_value_t = motion::DEFAULT_DRAG_FACTOR)]
    pub drag_factor: f32,
}

impl MotionArgs {
    /// Builds the integrator config, rejecting values that would make it diverge.
    pub fn to_config(&self) -> Result<MotionConfig, String> {
        for (name, value) in [
            ("forward-acceleration", self.forward_acceleration),
            ("backward-acceleration", self.backward_acceleration),
            ("max-speed", self.max_speed),
            ("friction", self.friction),
            ("idle-friction", self.idle_friction),
            ("rotation-speed", self.rotation_speed),
            ("move-speed", self.move_speed),
            ("zoom-speed", self.zoom_speed),
            ("bob-amplitude", self.bob_amplitude),
            ("drag-factor", self.drag_factor),
        ] {
            if !value.is_finite() {
                return Err(format!("{name} must be finite, got {value}"));
            }
        }
        for (name, value) in [("friction", self.friction), ("idle-friction", self.idle_friction)] {
            if !(0.0..1.0).contains(&value) {
                return Err(format!("{name} must be in [0, 1), got {value}"));
            }
        }
        if !(self.max_speed > 0.0) {
            return Err(format!("max-speed must be positive, got {}", self.max_speed));
        }
        Ok(MotionConfig {
            forward_acceleration: self.forward_acceleration,
            backward_acceleration: self.backward_acceleration,
            max_speed: self.max_speed,
            friction: self.friction,
            idle_friction: self.idle_friction,
            rotation_speed: self.rotation_speed,
            move_speed: self.move_speed,
            zoom_speed: self.zoom_speed,
            bob_amplitude: self.bob_amplitude,
            drag_factor: self.drag_factor,
            ..MotionConfig::default()
        })
    }
}
