use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::fetch::Fetcher;
use super::{CameraConfig, CameraError, CameraPicture, REQUEST_QUEUE_SIZE};
use crate::images::decode_image;

/// Background refresh only makes sense for cameras that are not already
/// polled at a high rate.
pub const MIN_PREEMPTIVE_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) struct RawRequest {
    response: oneshot::Sender<Arc<CameraPicture>>,
}

/// Sending side of the raw stage.
#[derive(Clone)]
pub(crate) struct RawHandle {
    requests: mpsc::Sender<RawRequest>,
}

impl RawHandle {
    pub async fn read(&self) -> Arc<CameraPicture> {
        let (response, receiver) = oneshot::channel();
        if self.requests.send(RawRequest { response }).await.is_err() {
            return Arc::new(CameraPicture::closed());
        }
        receiver.await.unwrap_or_else(|_| Arc::new(CameraPicture::closed()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptiveState {
    Idle,
    Armed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Fetch,
    Disarm,
}

/// Decides when the raw stage refreshes its picture on its own.
///
/// The schedule is armed by a foreground request and disarms itself once no
/// request was seen for longer than `threshold`, so an abandoned camera view
/// does not keep the camera busy forever. Time is passed in by the caller.
#[derive(Debug)]
pub struct PreemptiveSchedule {
    refresh_interval: Duration,
    threshold: Duration,
    state: PreemptiveState,
    last_request: Option<Instant>,
}

impl PreemptiveSchedule {
    pub fn new(refresh_interval: Duration, threshold: Duration) -> Self {
        Self {
            refresh_interval,
            threshold,
            state: PreemptiveState::Idle,
            last_request: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.threshold > self.refresh_interval && self.refresh_interval >= MIN_PREEMPTIVE_INTERVAL
    }

    #[cfg(test)]
    pub fn state(&self) -> PreemptiveState {
        self.state
    }

    /// Returns true if the caller must arm its timer.
    pub fn on_request(&mut self, now: Instant) -> bool {
        self.last_request = Some(now);
        if self.state == PreemptiveState::Idle && self.enabled() {
            self.state = PreemptiveState::Armed;
            return true;
        }
        false
    }

    pub fn on_tick(&mut self, now: Instant) -> TickAction {
        let idle_for = self
            .last_request
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::MAX);

        if idle_for > self.threshold {
            self.state = PreemptiveState::Idle;
            TickAction::Disarm
        } else {
            TickAction::Fetch
        }
    }
}

struct ReadOutcome {
    // the preemptive ticker has to be armed
    arm: bool,
    // the camera was asked for a new picture
    fetched: bool,
}

/// Owns the most recent picture of one camera.
///
/// Requests are served one at a time from a single loop; a cache miss fetches
/// inline, which is what limits every camera to one fetch in flight.
pub(crate) struct RawStage {
    config: Arc<CameraConfig>,
    fetcher: Box<dyn Fetcher>,
    last: Arc<CameraPicture>,
    schedule: PreemptiveSchedule,
}

impl RawStage {
    pub fn spawn(
        config: Arc<CameraConfig>,
        fetcher: Box<dyn Fetcher>,
        shutdown: watch::Receiver<bool>,
    ) -> (RawHandle, tokio::task::JoinHandle<()>) {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let schedule = PreemptiveSchedule::new(config.refresh_interval, config.preemptive_fetch);
        let stage = RawStage {
            config,
            fetcher,
            last: Arc::new(CameraPicture::empty()),
            schedule,
        };
        let task = tokio::spawn(stage.run(receiver, shutdown));
        (RawHandle { requests }, task)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<RawRequest>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                request = requests.recv() => match request {
                    Some(request) => match self.handle_read(request).await {
                        ReadOutcome { arm: true, .. } => ticker = Some(self.new_ticker()),
                        // restart the period so the next tick does not fetch right behind this one
                        ReadOutcome { fetched: true, .. } => {
                            if let Some(ticker) = ticker.as_mut() {
                                ticker.reset();
                            }
                        }
                        _ => {}
                    },
                    None => break,
                },
                _ = next_tick(&mut ticker) => {
                    if self.handle_tick().await == TickAction::Disarm {
                        ticker = None;
                    }
                }
            }
        }

        self.fetcher.close().await;
        if self.config.log_debug {
            debug!("cameraClient[{}]: raw stage stopped", self.config.name);
        }
    }

    async fn handle_read(&mut self, request: RawRequest) -> ReadOutcome {
        let now = Instant::now();
        let arm = self.schedule.on_request(now);

        let fetched = self.last.is_expired(now, self.config.expire_early);
        if fetched {
            if self.config.log_debug {
                debug!("cameraClient[{}]: raw image cache MISS", self.config.name);
            }
            self.fetch_image().await;
        } else if self.config.log_debug {
            debug!("cameraClient[{}]: raw image cache HIT", self.config.name);
        }

        // the requester may have gone away, that is fine
        let _ = request.response.send(Arc::clone(&self.last));
        ReadOutcome { arm, fetched }
    }

    async fn handle_tick(&mut self) -> TickAction {
        let action = self.schedule.on_tick(Instant::now());
        match action {
            TickAction::Fetch => {
                if self.config.log_debug {
                    debug!("cameraClient[{}]: preemptive fetch", self.config.name);
                }
                self.fetch_image().await;
            }
            TickAction::Disarm => {
                info!("cameraClient[{}]: no recent requests, preemptive fetch stopped", self.config.name);
            }
        }
        action
    }

    fn new_ticker(&self) -> Interval {
        let period = self.config.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if self.config.log_debug {
            debug!("cameraClient[{}]: preemptive fetch armed, period={:?}", self.config.name, period);
        }
        ticker
    }

    async fn fetch_image(&mut self) {
        let start = std::time::Instant::now();
        let refresh_interval = self.config.refresh_interval;

        let picture = match self.fetcher.fetch_raw_bytes().await {
            Ok(bytes) => decode(bytes, refresh_interval).await,
            Err(e) => CameraPicture::failed(e, refresh_interval),
        };

        if self.config.log_debug {
            debug!(
                "cameraClient[{}]: raw image fetched, ok={}, took={:?}",
                self.config.name,
                picture.error().is_none(),
                start.elapsed()
            );
        }

        // replaced as a whole, readers holding the old Arc keep a consistent picture
        self.last = Arc::new(picture);
    }
}

async fn decode(bytes: Vec<u8>, refresh_interval: Duration) -> CameraPicture {
    let decoded = tokio::task::spawn_blocking(move || {
        let img = decode_image(&bytes)?;
        Ok::<_, CameraError>((bytes, img))
    })
    .await;

    match decoded {
        Ok(Ok((bytes, img))) => CameraPicture::from_fetch(bytes, img, refresh_interval),
        Ok(Err(e)) => CameraPicture::failed(e, refresh_interval),
        Err(e) => CameraPicture::failed(CameraError::Decode(e.to_string()), refresh_interval),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_disabled_without_threshold_headroom() {
        let schedule = PreemptiveSchedule::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(!schedule.enabled());

        let schedule = PreemptiveSchedule::new(Duration::from_millis(200), Duration::from_secs(30));
        assert!(!schedule.enabled());

        let schedule = PreemptiveSchedule::new(Duration::from_secs(1), Duration::from_secs(30));
        assert!(schedule.enabled());
    }

    #[test]
    fn schedule_arms_once_and_disarms_after_threshold() {
        let t0 = Instant::now();
        let mut schedule = PreemptiveSchedule::new(Duration::from_secs(1), Duration::from_secs(5));

        assert!(schedule.on_request(t0));
        assert_eq!(schedule.state(), PreemptiveState::Armed);
        // already armed
        assert!(!schedule.on_request(t0 + Duration::from_millis(500)));

        assert_eq!(schedule.on_tick(t0 + Duration::from_secs(2)), TickAction::Fetch);
        assert_eq!(schedule.on_tick(t0 + Duration::from_millis(5500)), TickAction::Fetch);
        assert_eq!(schedule.on_tick(t0 + Duration::from_secs(6)), TickAction::Disarm);
        assert_eq!(schedule.state(), PreemptiveState::Idle);

        // a new request arms it again
        assert!(schedule.on_request(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn disabled_schedule_never_arms() {
        let mut schedule = PreemptiveSchedule::new(Duration::from_secs(1), Duration::ZERO);
        assert!(!schedule.on_request(Instant::now()));
        assert_eq!(schedule.state(), PreemptiveState::Idle);
    }
}
