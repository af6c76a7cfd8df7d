use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::delayed::DelayedHandle;
use super::{CameraConfig, CameraError, CameraPicture, Dimension, ResizeKey, REQUEST_QUEUE_SIZE};
use crate::images::resize_image;

pub(crate) struct ResizeRequest {
    key: ResizeKey,
    response: oneshot::Sender<Arc<CameraPicture>>,
}

#[derive(Clone)]
pub(crate) struct ResizeHandle {
    requests: mpsc::Sender<ResizeRequest>,
}

impl ResizeHandle {
    pub async fn read(&self, refresh_interval: Duration, dimension: Dimension, jpg_quality: u8) -> Arc<CameraPicture> {
        let (response, receiver) = oneshot::channel();
        let request = ResizeRequest {
            key: ResizeKey {
                refresh_interval,
                dimension,
                jpg_quality,
            },
            response,
        };
        if self.requests.send(request).await.is_err() {
            return Arc::new(CameraPicture::closed());
        }
        receiver.await.unwrap_or_else(|_| Arc::new(CameraPicture::closed()))
    }
}

struct Computed {
    key: ResizeKey,
    picture: Arc<CameraPicture>,
}

/// Scales and re-encodes delayed pictures.
///
/// Computations run in their own tasks so the loop keeps accepting requests
/// while one is in progress. Requests for a key that is already being
/// computed are parked in `waiting` and answered together. Only the loop
/// touches `cache` and `waiting`; results come back over `completed`.
pub(crate) struct ResizeStage {
    config: Arc<CameraConfig>,
    delayed: DelayedHandle,
    cache: HashMap<ResizeKey, Arc<CameraPicture>>,
    waiting: HashMap<ResizeKey, Vec<oneshot::Sender<Arc<CameraPicture>>>>,
    completed: mpsc::Sender<Computed>,
}

impl ResizeStage {
    pub fn spawn(
        config: Arc<CameraConfig>,
        delayed: DelayedHandle,
        shutdown: watch::Receiver<bool>,
    ) -> (ResizeHandle, tokio::task::JoinHandle<()>) {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (completed, completions) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let stage = ResizeStage {
            config,
            delayed,
            cache: HashMap::new(),
            waiting: HashMap::new(),
            completed,
        };
        let task = tokio::spawn(stage.run(receiver, completions, shutdown));
        (ResizeHandle { requests }, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<ResizeRequest>,
        mut completions: mpsc::Receiver<Computed>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(computed) = completions.recv() => self.handle_computed(computed),
                request = requests.recv() => match request {
                    Some(request) => self.handle_read(request),
                    None => break,
                },
            }
        }
    }

    fn handle_read(&mut self, request: ResizeRequest) {
        let key = request.key;

        let expire_early = self.config.expire_early;
        let now = Instant::now();
        self.cache.retain(|_, picture| !picture.is_expired(now, expire_early));

        if let Some(picture) = self.cache.get(&key) {
            if self.config.log_debug {
                debug!(
                    "cameraClient[{}]: resize image cache HIT, cacheKey={}, expiresIn={:?}",
                    self.config.name,
                    key,
                    picture.expires_in(now)
                );
            }
            let _ = request.response.send(Arc::clone(picture));
            return;
        }

        if let Some(responses) = self.waiting.get_mut(&key) {
            if self.config.log_debug {
                debug!("cameraClient[{}]: resize waitingResponses HIT, cacheKey={}", self.config.name, key);
            }
            responses.push(request.response);
            return;
        }

        if self.config.log_debug {
            debug!("cameraClient[{}]: resize image cache MISS, cacheKey={}", self.config.name, key);
        }
        self.waiting.insert(key, vec![request.response]);

        let config = Arc::clone(&self.config);
        let delayed = self.delayed.clone();
        let completed = self.completed.clone();
        tokio::spawn(async move {
            let picture = compute(&config, &delayed, key).await;
            // the stage is gone when this fails; nobody is waiting any more
            let _ = completed.send(Computed { key, picture }).await;
        });
    }

    fn handle_computed(&mut self, computed: Computed) {
        let Computed { key, picture } = computed;

        for response in self.waiting.remove(&key).unwrap_or_default() {
            let _ = response.send(Arc::clone(&picture));
        }

        self.cache.insert(key, picture);
    }
}

async fn compute(config: &CameraConfig, delayed: &DelayedHandle, key: ResizeKey) -> Arc<CameraPicture> {
    let start = std::time::Instant::now();
    let source = delayed.read(key.refresh_interval).await;
    let fetched = start.elapsed();

    // errors are passed on unchanged and cached like any other result
    if source.error().is_some() {
        return source;
    }

    // nothing decoded, nothing to resize
    let img = match source.decoded() {
        Some(img) => Arc::clone(img),
        None => return source,
    };

    let dimension = key.dimension;
    let quality = key.jpg_quality;
    let resized = tokio::task::spawn_blocking(move || resize_image(&img, dimension, quality)).await;

    let picture = match resized {
        Ok(Ok((jpg, img))) => source.with_image(jpg, img),
        Ok(Err(e)) => source.with_error(e),
        Err(e) => source.with_error(CameraError::Encode(e.to_string())),
    };

    if config.log_debug {
        debug!(
            "cameraClient[{}]: resized image, cacheKey={}, took={:?}, total={:?}",
            config.name,
            key,
            start.elapsed() - fetched,
            start.elapsed()
        );
    }

    Arc::new(picture)
}
