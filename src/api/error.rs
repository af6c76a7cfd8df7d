use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use rocket::Request;
use serde_json::json;

use crate::camera::CameraError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Camera(CameraError),
}

impl From<CameraError> for ApiError {
    fn from(error: CameraError) -> Self {
        ApiError::Camera(error)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, message) = match self {
            ApiError::NotFound(message) => (Status::NotFound, message),
            ApiError::Camera(error) => (Status::ServiceUnavailable, error.to_string()),
        };

        let body = json!({ "message": message }).to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
