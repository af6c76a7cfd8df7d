use std::sync::Arc;
use std::time::Duration;

use log::info;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::delayed::{DelayedHandle, DelayedStage};
use super::fetch::{create_fetcher, Fetcher};
use super::raw::{RawHandle, RawStage};
use super::resize::{ResizeHandle, ResizeStage};
use super::{CameraConfig, CameraError, CameraPicture, Dimension};

struct Stage {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Stage {
    async fn stop(self) {
        // the stage may already be gone, then nobody listens any more
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Stages in the order they have to be stopped: consumers first.
struct Stages {
    resize: Stage,
    delayed: Stage,
    raw: Stage,
}

/// One camera: a raw, a delayed and a resize stage chained together.
pub struct Client {
    config: Arc<CameraConfig>,
    raw: RawHandle,
    delayed: DelayedHandle,
    resize: ResizeHandle,
    stages: Mutex<Option<Stages>>,
}

impl Client {
    /// Creates the backend matching the camera address and starts the stages.
    pub async fn run(config: CameraConfig) -> Result<Client, CameraError> {
        let fetcher = create_fetcher(&config).await?;
        Ok(Client::with_fetcher(config, fetcher))
    }

    pub fn with_fetcher(config: CameraConfig, fetcher: Box<dyn Fetcher>) -> Client {
        let config = Arc::new(config);

        let (raw_shutdown, raw_signal) = watch::channel(false);
        let (raw, raw_task) = RawStage::spawn(Arc::clone(&config), fetcher, raw_signal);

        let (delayed_shutdown, delayed_signal) = watch::channel(false);
        let (delayed, delayed_task) = DelayedStage::spawn(Arc::clone(&config), raw.clone(), delayed_signal);

        let (resize_shutdown, resize_signal) = watch::channel(false);
        let (resize, resize_task) = ResizeStage::spawn(Arc::clone(&config), delayed.clone(), resize_signal);

        info!(
            "cameraClient[{}]: started, refreshInterval={:?}, preemptiveFetch={:?}",
            config.name, config.refresh_interval, config.preemptive_fetch
        );

        Client {
            config,
            raw,
            delayed,
            resize,
            stages: Mutex::new(Some(Stages {
                resize: Stage {
                    shutdown: resize_shutdown,
                    task: resize_task,
                },
                delayed: Stage {
                    shutdown: delayed_shutdown,
                    task: delayed_task,
                },
                raw: Stage {
                    shutdown: raw_shutdown,
                    task: raw_task,
                },
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Latest picture at the camera's own refresh interval.
    pub async fn get_raw_image(&self) -> Arc<CameraPicture> {
        self.raw.read().await
    }

    /// Picture that stays the same for `refresh_interval`.
    pub async fn get_delayed_image(&self, refresh_interval: Duration) -> Arc<CameraPicture> {
        self.delayed.read(refresh_interval).await
    }

    /// Picture fitted into `dimension` and encoded with `jpg_quality`.
    pub async fn get_resized_image(
        &self,
        refresh_interval: Duration,
        dimension: Dimension,
        jpg_quality: u8,
    ) -> Arc<CameraPicture> {
        self.resize.read(refresh_interval, dimension, jpg_quality).await
    }

    /// Stops all stages, resize first and raw last. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let stages = self.stages.lock().take();
        let stages = match stages {
            Some(stages) => stages,
            None => return,
        };

        stages.resize.stop().await;
        stages.delayed.stop().await;
        stages.raw.stop().await;

        info!("cameraClient[{}]: shut down", self.config.name);
    }
}
