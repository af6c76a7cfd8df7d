use thiserror::Error;

// Errors end up inside cached pictures which are shared between many
// consumers, so every variant carries a plain message and the type is Clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("got code {0} from camera when fetching a snapshot")]
    Status(u16),

    #[error("RTSP error: {0}")]
    Rtsp(String),

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Image encode error: {0}")]
    Encode(String),

    #[error("Camera client is shut down")]
    Closed,
}

impl From<reqwest::Error> for CameraError {
    fn from(error: reqwest::Error) -> Self {
        CameraError::Network(error.to_string())
    }
}
