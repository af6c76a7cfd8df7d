use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use crate::config::AppConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub project_title: String,
    pub backend_version: String,
    pub views: Vec<ViewResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub name: String,
    pub title: String,
    pub cameras: Vec<CameraViewResponse>,
    pub refresh_interval_ms: u64,
    pub is_public: bool,
    pub hidden: bool,
}

#[derive(Debug, Serialize)]
pub struct CameraViewResponse {
    pub name: String,
    pub title: String,
}

impl ConfigResponse {
    pub fn from_config(config: &AppConfig) -> Self {
        let views = config
            .views
            .iter()
            .map(|(name, view)| ViewResponse {
                name: name.clone(),
                title: view.title.clone().unwrap_or_else(|| name.clone()),
                cameras: view
                    .cameras
                    .iter()
                    .map(|camera| CameraViewResponse {
                        name: camera.clone(),
                        title: config
                            .cameras
                            .get(camera)
                            .and_then(|settings| settings.title.clone())
                            .unwrap_or_else(|| camera.clone()),
                    })
                    .collect(),
                refresh_interval_ms: view.refresh_interval_ms,
                is_public: view.public,
                hidden: view.hidden,
            })
            .collect();

        Self {
            project_title: config.project_title.clone(),
            backend_version: env!("CARGO_PKG_VERSION").to_string(),
            views,
        }
    }
}

// Everything a frontend needs to build the image URLs
#[get("/config")]
pub fn get_config(config: &State<AppConfig>) -> Json<ConfigResponse> {
    Json(ConfigResponse::from_config(config))
}
