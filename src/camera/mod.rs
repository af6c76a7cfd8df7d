//! Per-camera image cache.
//!
//! Each camera is served by a [`Client`] running three chained stages as
//! tokio tasks. The raw stage owns the fetch backend and the latest picture,
//! the delayed stage caches raw pictures per consumer refresh interval, and
//! the resize stage caches scaled and re-encoded pictures. Every stage replies
//! with shared immutable [`CameraPicture`]s; errors travel inside pictures.

mod client;
mod delayed;
mod error;
pub mod fetch;
mod picture;
mod pool;
mod raw;
mod resize;

use std::time::Duration;

pub use client::Client;
pub use error::CameraError;
pub use fetch::{create_fetcher, Fetcher};
pub use picture::{CameraPicture, Dimension, ResizeKey};
pub use pool::ClientPool;
pub use raw::MIN_PREEMPTIVE_INTERVAL;

/// Capacity of every stage request queue; a full queue blocks the sender.
pub const REQUEST_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub name: String,
    pub address: String,
    pub user: String,
    pub password: String,
    /// How long a raw picture is served before the camera is asked again.
    pub refresh_interval: Duration,
    /// Keep refreshing in the background for this long after the last
    /// request. Zero disables it.
    pub preemptive_fetch: Duration,
    /// Cached pictures are treated as stale this long before they expire.
    pub expire_early: Duration,
    pub log_debug: bool,
}

impl CameraConfig {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            user: String::new(),
            password: String::new(),
            refresh_interval: Duration::from_millis(200),
            preemptive_fetch: Duration::ZERO,
            expire_early: Duration::from_millis(50),
            log_debug: false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use image::DynamicImage;

    use super::{CameraConfig, CameraError, Fetcher};
    use crate::images::encode_jpeg;

    /// Camera config with a long refresh interval so nothing expires mid-test.
    pub fn config(name: &str) -> CameraConfig {
        let mut config = CameraConfig::new(name, "mock://camera");
        config.refresh_interval = Duration::from_secs(10);
        config
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        encode_jpeg(&DynamicImage::new_rgb8(width, height), 90).unwrap()
    }

    /// Counts calls and always answers with the same outcome.
    pub struct MockFetcher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        outcome: Result<Vec<u8>, CameraError>,
    }

    impl MockFetcher {
        pub fn ok() -> (Self, Arc<AtomicUsize>) {
            Self::bytes(jpeg(64, 48))
        }

        pub fn bytes(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
            Self::new(Ok(bytes))
        }

        pub fn failing(error: CameraError) -> (Self, Arc<AtomicUsize>) {
            Self::new(Err(error))
        }

        fn new(outcome: Result<Vec<u8>, CameraError>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let fetcher = MockFetcher {
                calls: Arc::clone(&calls),
                delay: Duration::ZERO,
                outcome,
            };
            (fetcher, calls)
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch_raw_bytes(&mut self) -> Result<Vec<u8>, CameraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }
}
