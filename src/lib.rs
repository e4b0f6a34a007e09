//! pano-drop: panorama upload server and viewer.
//!
//! Accepts panorama uploads, stores them in a flat uploads directory, and serves
//! a three.js page that maps the image onto the inside of a sphere. A side
//! endpoint copies an externally stitched image into the same directory. The
//! movement integrator driving the page lives in [`motion`].

pub mod atomic;
pub mod config;
pub mod error;
pub mod etag;
pub mod frontend;
pub mod http;
pub mod logging;
pub mod motion;
pub mod storage;
pub mod tls;
pub mod upload;
pub mod version;
pub mod viewer;

use shadow_rs::shadow;

shadow!(build);
