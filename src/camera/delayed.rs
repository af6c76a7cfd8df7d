use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::raw::RawHandle;
use super::{CameraConfig, CameraPicture, REQUEST_QUEUE_SIZE};

pub(crate) struct DelayedRequest {
    refresh_interval: Duration,
    response: oneshot::Sender<Arc<CameraPicture>>,
}

#[derive(Clone)]
pub(crate) struct DelayedHandle {
    requests: mpsc::Sender<DelayedRequest>,
}

impl DelayedHandle {
    pub async fn read(&self, refresh_interval: Duration) -> Arc<CameraPicture> {
        let (response, receiver) = oneshot::channel();
        let request = DelayedRequest {
            refresh_interval,
            response,
        };
        if self.requests.send(request).await.is_err() {
            return Arc::new(CameraPicture::closed());
        }
        receiver.await.unwrap_or_else(|_| Arc::new(CameraPicture::closed()))
    }
}

/// Caches raw pictures per consumer refresh interval.
///
/// A consumer polling every minute keeps getting the same picture for a
/// minute even if the camera itself is refreshed every 200ms, while all
/// consumers with the same interval share one entry.
pub(crate) struct DelayedStage {
    config: Arc<CameraConfig>,
    raw: RawHandle,
    cache: HashMap<Duration, Arc<CameraPicture>>,
}

impl DelayedStage {
    pub fn spawn(
        config: Arc<CameraConfig>,
        raw: RawHandle,
        shutdown: watch::Receiver<bool>,
    ) -> (DelayedHandle, tokio::task::JoinHandle<()>) {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let stage = DelayedStage {
            config,
            raw,
            cache: HashMap::new(),
        };
        let task = tokio::spawn(stage.run(receiver, shutdown));
        (DelayedHandle { requests }, task)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<DelayedRequest>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle_read(request).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_read(&mut self, request: DelayedRequest) {
        let refresh_interval = request.refresh_interval;

        let expire_early = self.config.expire_early;
        let now = Instant::now();
        self.cache.retain(|_, picture| !picture.is_expired(now, expire_early));

        if let Some(picture) = self.cache.get(&refresh_interval) {
            if self.config.log_debug {
                debug!(
                    "cameraClient[{}]: delayed image cache HIT, refreshInterval={:?}, expiresIn={:?}",
                    self.config.name,
                    refresh_interval,
                    picture.expires_in(now)
                );
            }
            let _ = request.response.send(Arc::clone(picture));
            return;
        }

        let raw = self.raw.read().await;

        // never expire before the raw picture, but honour the slower cadence
        let delayed = Arc::new(raw.with_expires(raw.fetched() + refresh_interval));

        if self.config.log_debug {
            debug!(
                "cameraClient[{}]: delayed image cache MISS, updated, refreshInterval={:?}",
                self.config.name, refresh_interval
            );
        }

        self.cache.insert(refresh_interval, Arc::clone(&delayed));
        let _ = request.response.send(delayed);
    }
}
