use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use rocket::http::{ContentType, Header, Status};
use rocket::response::{self, Redirect, Responder, Response};
use rocket::{Request, State};
use tokio::time::Instant;

use crate::api::ApiError;
use crate::camera::{CameraPicture, ClientPool, Dimension};
use crate::config::AppConfig;
use crate::hash_store::{mint_hash, HashSecret, HashStore};

lazy_static! {
    static ref HASH_FILE: Regex = Regex::new(r"^[0-9a-f]{32}\.jpg$").unwrap();
}

// Responder for camera pictures
pub struct ImageResponse {
    pub data: Vec<u8>,
    pub max_age: u64,
    pub last_modified: DateTime<Utc>,
}

impl ImageResponse {
    fn from_picture(picture: &CameraPicture) -> Self {
        Self {
            data: picture.jpg().to_vec(),
            max_age: picture.expires_in(Instant::now()).as_secs(),
            last_modified: picture.fetched_at(),
        }
    }
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let etag = format!("\"{:x}\"", md5::compute(&self.data));
        let cache_control = format!("public, max-age={}", self.max_age);
        let last_modified = http_date(&self.last_modified);

        if let Some(if_none_match) = req.headers().get_one("If-None-Match") {
            if if_none_match == etag {
                return Response::build()
                    .status(Status::NotModified)
                    .header(Header::new("ETag", etag))
                    .header(Header::new("Cache-Control", cache_control))
                    .header(Header::new("Last-Modified", last_modified))
                    .ok();
            }
        }

        Response::build()
            .header(ContentType::JPEG)
            .header(Header::new("Cache-Control", cache_control))
            .header(Header::new("ETag", etag))
            .header(Header::new("Last-Modified", last_modified))
            .sized_body(self.data.len(), Cursor::new(self.data))
            .ok()
    }
}

#[derive(Responder)]
pub enum ImageReply {
    Image(ImageResponse),
    Redirect(Redirect),
}

#[get("/images/<view_name>/<file>?<width>&<height>")]
pub async fn get_image(
    view_name: &str,
    file: &str,
    width: Option<u32>,
    height: Option<u32>,
    config: &State<AppConfig>,
    pool: &State<ClientPool>,
    hash_store: &State<HashStore>,
    secret: &State<HashSecret>,
) -> Result<ImageReply, ApiError> {
    let view = config
        .views
        .get(view_name)
        .ok_or_else(|| ApiError::NotFound(format!("view '{}' not found", view_name)))?;

    let camera = file
        .strip_suffix(".jpg")
        .filter(|camera| view.has_camera(camera))
        .ok_or_else(|| ApiError::NotFound(format!("camera '{}' not found in view '{}'", file, view_name)))?;

    let client = pool
        .get_client(camera)
        .ok_or_else(|| ApiError::NotFound(format!("camera '{}' is not running", camera)))?;

    // query parameters can only lower the view maximum
    let dimension = Dimension::new(
        bounded(width, view.resolution_max_width),
        bounded(height, view.resolution_max_height),
    );

    let picture = client
        .get_resized_image(view.refresh_interval(), dimension, view.jpg_quality)
        .await;

    if let Some(error) = picture.error() {
        return Err(error.clone().into());
    }

    if view.public {
        return Ok(ImageReply::Image(ImageResponse::from_picture(&picture)));
    }

    let hash = mint_hash(secret, camera, &picture);
    debug!("imagesApi: {}/{} minted hash {}", view_name, camera, hash);
    hash_store.set(hash.clone(), Arc::clone(&picture)).await;

    Ok(ImageReply::Redirect(Redirect::temporary(format!(
        "/api/v0/imagesByHash/{}.jpg",
        hash
    ))))
}

#[get("/imagesByHash/<file>")]
pub async fn get_image_by_hash(file: &str, hash_store: &State<HashStore>) -> Result<ImageResponse, ApiError> {
    if !HASH_FILE.is_match(file) {
        return Err(ApiError::NotFound(format!("invalid image hash '{}'", file)));
    }

    let hash = &file[..32];
    let picture = hash_store
        .get(hash)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("image hash '{}' not found", hash)))?;

    Ok(ImageResponse::from_picture(&picture))
}

// IMF-fixdate, e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
fn http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn bounded(requested: Option<u32>, max: u32) -> u32 {
    requested.filter(|value| *value > 0).map_or(max, |value| value.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_can_only_lower_the_maximum() {
        assert_eq!(bounded(None, 800), 800);
        assert_eq!(bounded(Some(0), 800), 800);
        assert_eq!(bounded(Some(320), 800), 320);
        assert_eq!(bounded(Some(4000), 800), 800);
    }

    #[test]
    fn last_modified_is_an_http_date() {
        let time = DateTime::parse_from_rfc3339("1994-11-06T08:49:37Z").unwrap().with_timezone(&Utc);
        assert_eq!(http_date(&time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn hash_file_names() {
        assert!(HASH_FILE.is_match("0123456789abcdef0123456789abcdef.jpg"));
        assert!(!HASH_FILE.is_match("0123456789ABCDEF0123456789abcdef.jpg"));
        assert!(!HASH_FILE.is_match("0123456789abcdef.jpg"));
        assert!(!HASH_FILE.is_match("0123456789abcdef0123456789abcdef.png"));
        assert!(!HASH_FILE.is_match("../0123456789abcdef0123456789abcd.jpg"));
    }
}
