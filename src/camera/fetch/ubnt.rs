use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{Fetcher, FETCH_TIMEOUT};
use crate::camera::{CameraConfig, CameraError};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Snapshot client for cameras with a session based HTTP API
/// (`/api/1.1/login` followed by `/snap.jpeg`).
pub struct UbntFetcher {
    name: String,
    base_url: String,
    user: String,
    password: String,
    log_debug: bool,
    client: Client,
    authenticated: bool,
    // last logged network error, used to log a sustained outage only once
    last_error: Option<String>,
}

impl UbntFetcher {
    pub fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        // the session cookie lives in the client's cookie store;
        // these cameras ship self-signed certificates
        let client = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            name: config.name.clone(),
            base_url: base_url(&config.address),
            user: config.user.clone(),
            password: config.password.clone(),
            log_debug: config.log_debug,
            client,
            authenticated: false,
            last_error: None,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn login(&mut self, force: bool) -> Result<(), CameraError> {
        if force {
            self.authenticated = false;
        }

        if self.authenticated {
            return Ok(());
        }

        let start = Instant::now();
        let url = format!("{}/api/1.1/login", self.base_url);
        let body = LoginRequest {
            username: &self.user,
            password: &self.password,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                self.log_network_error("login failed", &e);
                return Err(CameraError::Auth(e.to_string()));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(
                "cameraClient[{}]: login failed, code={}, addr={}",
                self.name,
                status.as_u16(),
                url
            );
            return Err(CameraError::Auth(format!(
                "got code {} from camera during login",
                status.as_u16()
            )));
        }

        self.authenticated = true;
        if self.log_debug {
            debug!("cameraClient[{}]: login successful, took={:?}", self.name, start.elapsed());
        } else {
            info!("cameraClient[{}]: login successful", self.name);
        }

        Ok(())
    }

    async fn get_snapshot(&mut self, url: &str) -> Result<reqwest::Response, CameraError> {
        match self.client.get(url).send().await {
            Ok(response) => {
                self.last_error = None;
                Ok(response)
            }
            Err(e) => {
                self.log_network_error("fetch failed", &e);
                Err(CameraError::Network(e.to_string()))
            }
        }
    }

    // Only print the same error once and not on every retry; this keeps the
    // logs readable while a camera is unreachable.
    fn log_network_error(&mut self, context: &str, error: &reqwest::Error) {
        let message = format!("cameraClient[{}]: {}: {}", self.name, context, error);
        if self.last_error.as_deref() != Some(message.as_str()) {
            warn!("{}", message);
        }
        self.last_error = Some(message);
    }
}

#[async_trait]
impl Fetcher for UbntFetcher {
    async fn fetch_raw_bytes(&mut self) -> Result<Vec<u8>, CameraError> {
        self.login(false).await?;

        let start = Instant::now();
        let url = format!("{}/snap.jpeg", self.base_url);

        let mut response = self.get_snapshot(&url).await?;

        // the session may have expired on the camera: log in again, retry once
        if response.status() == StatusCode::UNAUTHORIZED {
            self.login(true).await?;
            response = self.get_snapshot(&url).await?;
        }

        let status = response.status();
        if status != StatusCode::OK {
            if self.log_debug {
                debug!("cameraClient[{}]: fetch failed with code {}", self.name, status.as_u16());
            }
            return Err(CameraError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;

        if self.log_debug {
            debug!(
                "cameraClient[{}]: image fetched, size={}, took={:?}",
                self.name,
                bytes.len(),
                start.elapsed()
            );
        }

        Ok(bytes.to_vec())
    }
}

fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}
