//! Short-lived mapping from opaque hashes to pictures.
//!
//! Non-public views do not serve images directly; they mint a hash for the
//! picture and redirect to a URL containing it. The hash stays resolvable for
//! `hash_timeout` after it was last handed out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::camera::{CameraPicture, Dimension, REQUEST_QUEUE_SIZE};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const SECRET_LENGTH: usize = 64;

/// Salt for minted hashes, generated once per process.
#[derive(Clone)]
pub struct HashSecret(String);

impl HashSecret {
    pub fn generate() -> Self {
        let secret = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();
        HashSecret(secret)
    }

    pub fn new(secret: impl Into<String>) -> Self {
        HashSecret(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// never print the secret itself
impl fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashSecret(..)")
    }
}

/// Lowercase hex MD5 of `<secret>-<camera>-<fetch_id>-<w>x<h>`.
pub fn mint_hash(secret: &HashSecret, camera: &str, picture: &CameraPicture) -> String {
    let dimension = picture.dimension().unwrap_or(Dimension::new(0, 0));
    let input = format!("{}-{}-{}-{}", secret.as_str(), camera, picture.fetch_id(), dimension);
    format!("{:x}", md5::compute(input.as_bytes()))
}

enum Request {
    Set {
        hash: String,
        picture: Arc<CameraPicture>,
    },
    Get {
        hash: String,
        response: oneshot::Sender<Option<Arc<CameraPicture>>>,
    },
    Len {
        response: oneshot::Sender<usize>,
    },
}

struct Entry {
    picture: Arc<CameraPicture>,
    touched: Instant,
}

pub struct HashStore {
    requests: mpsc::Sender<Request>,
    stop: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl HashStore {
    pub fn new(hash_timeout: Duration) -> Self {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(run(hash_timeout, receiver, signal));
        info!("hashStore: started, hashTimeout={:?}", hash_timeout);
        Self {
            requests,
            stop: Mutex::new(Some((shutdown, task))),
        }
    }

    /// Stores `hash`, or refreshes its timeout if it is already known.
    pub async fn set(&self, hash: String, picture: Arc<CameraPicture>) {
        let _ = self.requests.send(Request::Set { hash, picture }).await;
    }

    pub async fn get(&self, hash: &str) -> Option<Arc<CameraPicture>> {
        let (response, receiver) = oneshot::channel();
        let request = Request::Get {
            hash: hash.to_string(),
            response,
        };
        self.requests.send(request).await.ok()?;
        receiver.await.ok().flatten()
    }

    pub async fn len(&self) -> usize {
        let (response, receiver) = oneshot::channel();
        if self.requests.send(Request::Len { response }).await.is_err() {
            return 0;
        }
        receiver.await.unwrap_or(0)
    }

    pub async fn shutdown(&self) {
        let stop = self.stop.lock().take();
        if let Some((shutdown, task)) = stop {
            let _ = shutdown.send(true);
            let _ = task.await;
            info!("hashStore: shut down");
        }
    }
}

async fn run(hash_timeout: Duration, mut requests: mpsc::Receiver<Request>, mut shutdown: watch::Receiver<bool>) {
    let mut entries: HashMap<String, Entry> = HashMap::new();
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let overdue = |entry: &Entry, now: Instant| entry.touched + hash_timeout < now;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = sweep.tick() => {
                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, entry| !overdue(&*entry, now));
                if entries.len() != before {
                    debug!("hashStore: evicted {} hashes, {} left", before - entries.len(), entries.len());
                }
            }
            request = requests.recv() => match request {
                Some(Request::Set { hash, picture }) => {
                    // a known hash keeps its first picture, only the timeout is refreshed
                    let now = Instant::now();
                    entries
                        .entry(hash)
                        .and_modify(|entry| entry.touched = now)
                        .or_insert(Entry { picture, touched: now });
                }
                Some(Request::Get { hash, response }) => {
                    let now = Instant::now();
                    let picture = match entries.get(&hash) {
                        Some(entry) if !overdue(entry, now) => Some(Arc::clone(&entry.picture)),
                        Some(_) => {
                            entries.remove(&hash);
                            None
                        }
                        None => None,
                    };
                    let _ = response.send(picture);
                }
                Some(Request::Len { response }) => {
                    let _ = response.send(entries.len());
                }
                None => break,
            },
        }
    }
}
