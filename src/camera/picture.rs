use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};
use tokio::time::Instant;
use uuid::Uuid;

use super::CameraError;

/// Width and height of a picture, or the bounding box a consumer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of_image(img: &DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height }
    }

    pub fn cache_key(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Everything that makes two resize requests interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeKey {
    pub refresh_interval: Duration,
    pub dimension: Dimension,
    pub jpg_quality: u8,
}

impl fmt::Display for ResizeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}-{}-{}",
            self.refresh_interval,
            self.dimension.cache_key(),
            self.jpg_quality
        )
    }
}

/// A still image as produced by one fetch from a camera.
///
/// Pictures are never mutated after construction. The delayed and resize
/// stages derive new pictures from an upstream one; derivations keep the
/// `fetch_id` and timestamps of their source.
#[derive(Debug, Clone)]
pub struct CameraPicture {
    jpg: Arc<[u8]>,
    decoded: Option<Arc<DynamicImage>>,
    fetched: Instant,
    fetched_at: DateTime<Utc>,
    expires: Instant,
    fetch_id: Uuid,
    error: Option<CameraError>,
}

impl CameraPicture {
    /// A successfully fetched picture valid for `refresh_interval`.
    pub fn from_fetch(jpg: Vec<u8>, decoded: DynamicImage, refresh_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            jpg: jpg.into(),
            decoded: Some(Arc::new(decoded)),
            fetched: now,
            fetched_at: Utc::now(),
            expires: now + refresh_interval,
            fetch_id: Uuid::new_v4(),
            error: None,
        }
    }

    /// A failed fetch. It is cached like a successful one so that a broken
    /// camera is retried at most once per `refresh_interval`.
    pub fn failed(error: CameraError, refresh_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            jpg: Vec::<u8>::new().into(),
            decoded: None,
            fetched: now,
            fetched_at: Utc::now(),
            expires: now + refresh_interval,
            fetch_id: Uuid::new_v4(),
            error: Some(error),
        }
    }

    /// Placeholder held by the raw stage before the first fetch; always expired.
    pub(crate) fn empty() -> Self {
        let now = Instant::now();
        Self {
            jpg: Vec::<u8>::new().into(),
            decoded: None,
            fetched: now,
            fetched_at: Utc::now(),
            expires: now,
            fetch_id: Uuid::nil(),
            error: None,
        }
    }

    pub(crate) fn closed() -> Self {
        let mut picture = Self::empty();
        picture.error = Some(CameraError::Closed);
        picture
    }

    /// Same image, later expiry. Never moves the expiry earlier.
    pub fn with_expires(&self, expires: Instant) -> Self {
        Self {
            expires: expires.max(self.expires),
            ..self.clone()
        }
    }

    /// Same fetch, different encoding.
    pub fn with_image(&self, jpg: Vec<u8>, decoded: Arc<DynamicImage>) -> Self {
        Self {
            jpg: jpg.into(),
            decoded: Some(decoded),
            error: None,
            ..self.clone()
        }
    }

    /// Same fetch, but the derivation failed.
    pub fn with_error(&self, error: CameraError) -> Self {
        Self {
            jpg: Vec::<u8>::new().into(),
            decoded: None,
            error: Some(error),
            ..self.clone()
        }
    }

    pub fn jpg(&self) -> &[u8] {
        &self.jpg
    }

    pub fn decoded(&self) -> Option<&Arc<DynamicImage>> {
        self.decoded.as_ref()
    }

    pub fn dimension(&self) -> Option<Dimension> {
        self.decoded.as_deref().map(Dimension::of_image)
    }

    pub fn fetched(&self) -> Instant {
        self.fetched
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn expires(&self) -> Instant {
        self.expires
    }

    pub fn fetch_id(&self) -> Uuid {
        self.fetch_id
    }

    pub fn error(&self) -> Option<&CameraError> {
        self.error.as_ref()
    }

    /// Early expiry: an entry is stale `expire_early` before its deadline.
    pub fn is_expired(&self, now: Instant, expire_early: Duration) -> bool {
        self.expires <= now + expire_early
    }

    pub fn expires_in(&self, now: Instant) -> Duration {
        self.expires.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn early_expiry_uses_margin() {
        let picture = CameraPicture::failed(CameraError::Closed, Duration::from_secs(1));
        let now = picture.fetched();

        assert!(!picture.is_expired(now, Duration::from_millis(50)));
        assert!(picture.is_expired(now + Duration::from_millis(950), Duration::from_millis(50)));
        assert!(picture.is_expired(now + Duration::from_secs(1), Duration::ZERO));
    }

    #[tokio::test]
    async fn derivations_keep_fetch_identity() {
        let source = CameraPicture::from_fetch(
            vec![1, 2, 3],
            DynamicImage::new_rgb8(4, 3),
            Duration::from_secs(1),
        );

        let later = source.with_expires(source.fetched() + Duration::from_secs(10));
        assert_eq!(later.fetch_id(), source.fetch_id());
        assert_eq!(later.expires(), source.fetched() + Duration::from_secs(10));

        // never earlier than the source
        let earlier = source.with_expires(source.fetched());
        assert_eq!(earlier.expires(), source.expires());

        let failed = source.with_error(CameraError::Encode("boom".to_string()));
        assert_eq!(failed.fetch_id(), source.fetch_id());
        assert!(failed.jpg().is_empty());
        assert_eq!(source.dimension(), Some(Dimension::new(4, 3)));
    }

    #[test]
    fn resize_key_display() {
        let key = ResizeKey {
            refresh_interval: Duration::from_secs(60),
            dimension: Dimension::new(800, 600),
            jpg_quality: 90,
        };
        assert_eq!(key.to_string(), "60s-800x600-90");
    }
}
