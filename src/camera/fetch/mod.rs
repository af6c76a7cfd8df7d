//! Backends that pull the raw bytes of a still image off a camera.

mod rtsp;
mod ubnt;

use std::time::Duration;

use async_trait::async_trait;

pub use rtsp::RtspFetcher;
pub use ubnt::UbntFetcher;

use super::{CameraConfig, CameraError};

/// Cameras live on the local network, so every backend gives up quickly.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One way of getting a snapshot out of a camera.
///
/// A fetcher is owned by exactly one raw stage and is only ever driven from
/// that stage's loop, hence `&mut self` and no `Sync` bound.
#[async_trait]
pub trait Fetcher: Send {
    async fn fetch_raw_bytes(&mut self) -> Result<Vec<u8>, CameraError>;

    /// Release backend resources. Called once when the client shuts down.
    async fn close(&mut self) {}
}

/// Picks the backend from the camera address: `rtsp://` URLs are grabbed
/// through ffmpeg, everything else talks to the HTTP snapshot API.
pub async fn create_fetcher(config: &CameraConfig) -> Result<Box<dyn Fetcher>, CameraError> {
    if config.address.starts_with("rtsp://") || config.address.starts_with("rtsps://") {
        Ok(Box::new(RtspFetcher::create(config).await?))
    } else {
        Ok(Box::new(UbntFetcher::new(config)?))
    }
}
