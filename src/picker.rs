use crate::types::CapturedImage;
use bytes::Bytes;
use failure::Fail;
use log::info;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Camera,
    Gallery,
}

#[derive(Debug, Fail)]
pub enum PickError {
    #[fail(display = "Permission to use the {:?} was denied", _0)]
    PermissionDenied(ImageSource),
    #[fail(display = "Could not read image: {}", _0)]
    Io(#[fail(cause)] io::Error),
}

/// Camera / gallery access. `Ok(None)` means the user backed out.
#[allow(async_fn_in_trait)]
pub trait ImagePicker {
    async fn pick(&self, source: ImageSource) -> Result<Option<CapturedImage>, PickError>;
}

/// Serves a file from disk for either source; no file means "cancelled".
#[derive(Debug, Clone)]
pub struct FilePicker {
    path: Option<PathBuf>,
}

impl FilePicker {
    pub fn new(path: Option<PathBuf>) -> Self {
        FilePicker { path }
    }
}

impl ImagePicker for FilePicker {
    async fn pick(&self, source: ImageSource) -> Result<Option<CapturedImage>, PickError> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(None),
        };
        let data = tokio::fs::read(path).await.map_err(PickError::Io)?;
        info!("Picked {} ({} bytes) from {:?}", path.display(), data.len(), source);
        Ok(Some(CapturedImage::with_bytes(
            path.to_string_lossy().to_string(),
            Bytes::from(data),
        )))
    }
}
