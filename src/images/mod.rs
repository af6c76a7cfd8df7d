pub mod tools;

pub use tools::{decode_image, encode_jpeg, fit_dimension, resize_image};
