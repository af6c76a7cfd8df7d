use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::camera::CameraConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub address: String,
    #[serde(default = "default_project_title")]
    pub project_title: String,
    /// Seconds a minted image hash stays valid after it was last handed out.
    #[serde(default = "default_hash_timeout")]
    pub hash_timeout: u64,
    #[serde(default)]
    pub log_debug: bool,
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraSettings>,
    #[serde(default)]
    pub views: BTreeMap<String, ViewConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraSettings {
    pub address: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_camera_refresh_interval")]
    pub refresh_interval_ms: u64,
    #[serde(default)]
    pub preemptive_fetch_ms: u64,
    #[serde(default = "default_expire_early")]
    pub expire_early_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    pub cameras: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_max_width")]
    pub resolution_max_width: u32,
    #[serde(default = "default_max_height")]
    pub resolution_max_height: u32,
    #[serde(default = "default_view_refresh_interval")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_jpg_quality")]
    pub jpg_quality: u8,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub hidden: bool,
}

fn default_project_title() -> String {
    "camcache".to_string()
}

fn default_hash_timeout() -> u64 {
    60
}

fn default_camera_refresh_interval() -> u64 {
    200
}

fn default_expire_early() -> u64 {
    50
}

fn default_max_width() -> u32 {
    3840
}

fn default_max_height() -> u32 {
    2160
}

fn default_view_refresh_interval() -> u64 {
    60_000
}

fn default_jpg_quality() -> u8 {
    90
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no cameras configured")]
    NoCameras,
    #[error("view {view} references unknown camera {camera}")]
    UnknownCamera { view: String, camera: String },
    #[error("camera {0}: refresh_interval_ms must be greater than zero")]
    ZeroRefreshInterval(String),
    #[error("camera {0}: expire_early_ms must be less than refresh_interval_ms")]
    ExpireEarlyTooLarge(String),
    #[error("view {0}: resolution_max_width and resolution_max_height must be greater than zero")]
    ZeroResolution(String),
    #[error("view {view}: jpg_quality {quality} is not within 1..=100")]
    JpgQualityOutOfRange { view: String, quality: u8 },
}

impl AppConfig {
    pub fn hash_timeout(&self) -> Duration {
        Duration::from_secs(self.hash_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::NoCameras);
        }

        for (name, camera) in &self.cameras {
            if camera.refresh_interval_ms == 0 {
                return Err(ConfigError::ZeroRefreshInterval(name.clone()));
            }
            if camera.expire_early_ms >= camera.refresh_interval_ms {
                return Err(ConfigError::ExpireEarlyTooLarge(name.clone()));
            }
        }

        for (view, config) in &self.views {
            if let Some(camera) = config.cameras.iter().find(|c| !self.cameras.contains_key(*c)) {
                return Err(ConfigError::UnknownCamera {
                    view: view.clone(),
                    camera: camera.clone(),
                });
            }
            if config.resolution_max_width == 0 || config.resolution_max_height == 0 {
                return Err(ConfigError::ZeroResolution(view.clone()));
            }
            if !(1..=100).contains(&config.jpg_quality) {
                return Err(ConfigError::JpgQualityOutOfRange {
                    view: view.clone(),
                    quality: config.jpg_quality,
                });
            }
        }

        Ok(())
    }

    pub fn camera_configs(&self) -> Vec<CameraConfig> {
        self.cameras
            .iter()
            .map(|(name, camera)| {
                let mut config = CameraConfig::new(name, &camera.address);
                config.user = camera.user.clone();
                config.password = camera.password.clone();
                config.refresh_interval = Duration::from_millis(camera.refresh_interval_ms);
                config.preemptive_fetch = Duration::from_millis(camera.preemptive_fetch_ms);
                config.expire_early = Duration::from_millis(camera.expire_early_ms);
                config.log_debug = self.log_debug;
                config
            })
            .collect()
    }
}

impl ViewConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn has_camera(&self, camera: &str) -> bool {
        self.cameras.iter().any(|c| c == camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::figment::providers::{Format, Toml};
    use rocket::figment::Figment;

    const APP_TOML: &str = r#"
        port = 8000
        address = "127.0.0.1"

        [cameras.front]
        address = "10.0.0.10"
        user = "admin"
        password = "secret"
        refresh_interval_ms = 1000
        preemptive_fetch_ms = 30000

        [cameras.garage]
        address = "rtsp://10.0.0.11/live"

        [views.overview]
        cameras = ["front", "garage"]
        resolution_max_width = 800
        resolution_max_height = 600
        public = true
    "#;

    fn parse(toml: &str) -> AppConfig {
        Figment::from(Toml::string(toml)).extract().unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse(APP_TOML);
        assert_eq!(config.hash_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let view = &config.views["overview"];
        assert_eq!(view.jpg_quality, 90);
        assert_eq!(view.refresh_interval(), Duration::from_secs(60));
        assert!(view.has_camera("garage"));
        assert!(!view.has_camera("back"));

        let garage = &config.cameras["garage"];
        assert_eq!(garage.refresh_interval_ms, 200);
        assert_eq!(garage.expire_early_ms, 50);
        assert_eq!(garage.preemptive_fetch_ms, 0);
        assert!(garage.user.is_empty());
    }

    #[test]
    fn camera_configs_carry_settings() {
        let configs = parse(APP_TOML).camera_configs();
        assert_eq!(configs.len(), 2);

        let front = &configs[0];
        assert_eq!(front.name, "front");
        assert_eq!(front.user, "admin");
        assert_eq!(front.refresh_interval, Duration::from_secs(1));
        assert_eq!(front.preemptive_fetch, Duration::from_secs(30));
        assert_eq!(front.expire_early, Duration::from_millis(50));
    }

    #[test]
    fn unknown_view_camera_is_rejected() {
        let mut config = parse(APP_TOML);
        config.views.get_mut("overview").unwrap().cameras.push("back".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownCamera {
                view: "overview".to_string(),
                camera: "back".to_string()
            })
        );
    }

    #[test]
    fn bad_intervals_are_rejected() {
        let mut config = parse(APP_TOML);
        config.cameras.get_mut("front").unwrap().expire_early_ms = 1000;
        assert_eq!(config.validate(), Err(ConfigError::ExpireEarlyTooLarge("front".to_string())));

        config.cameras.get_mut("front").unwrap().refresh_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroRefreshInterval("front".to_string())));
    }

    #[test]
    fn bad_view_output_is_rejected() {
        let mut config = parse(APP_TOML);
        config.views.get_mut("overview").unwrap().resolution_max_height = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroResolution("overview".to_string())));

        let mut config = parse(APP_TOML);
        config.views.get_mut("overview").unwrap().jpg_quality = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::JpgQualityOutOfRange {
                view: "overview".to_string(),
                quality: 0
            })
        );

        config.views.get_mut("overview").unwrap().jpg_quality = 101;
        assert!(matches!(config.validate(), Err(ConfigError::JpgQualityOutOfRange { quality: 101, .. })));

        config.views.get_mut("overview").unwrap().jpg_quality = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_camera_list_is_rejected() {
        let config = parse("port = 8000\naddress = \"127.0.0.1\"");
        assert_eq!(config.validate(), Err(ConfigError::NoCameras));
    }
}
