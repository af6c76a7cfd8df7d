pub mod config;
mod error;
pub mod images;

pub use error::ApiError;

pub fn routes() -> Vec<rocket::Route> {
    routes![config::get_config, images::get_image, images::get_image_by_hash]
}
