use crate::exif;
use crate::types::{CapturedImage, GeoLocation};
use failure::Fail;
use log::{debug, info, warn};

#[derive(Debug, Fail)]
pub enum LocationError {
    #[fail(display = "Location permission denied")]
    PermissionDenied,
    #[fail(display = "Location unavailable: {}", _0)]
    Unavailable(String),
}

/// Live position source of the device (GPS, network location, ...).
#[allow(async_fn_in_trait)]
pub trait DeviceLocation {
    async fn current_position(&self) -> Result<GeoLocation, LocationError>;
}

/// For platforms without any position source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceLocation;

impl DeviceLocation for NoDeviceLocation {
    async fn current_position(&self) -> Result<GeoLocation, LocationError> {
        Err(LocationError::Unavailable("no location source".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub GeoLocation);

impl DeviceLocation for FixedLocation {
    async fn current_position(&self) -> Result<GeoLocation, LocationError> {
        Ok(GeoLocation {
            captured_at_epoch_ms: crate::types::now_epoch_ms(),
            ..self.0
        })
    }
}

pub struct LocationResolver<D> {
    device: D,
}

impl<D: DeviceLocation> LocationResolver<D> {
    pub fn new(device: D) -> Self {
        LocationResolver { device }
    }

    /// Best-effort position for `image`: embedded EXIF GPS first, then the
    /// device. Never fails; every problem ends up as `None` plus a log line.
    pub async fn resolve(&self, image: &CapturedImage) -> Option<GeoLocation> {
        if let Some(location) = self.from_image(image).await {
            info!(
                "Using position embedded in {}: {},{}",
                image.uri(),
                location.latitude,
                location.longitude
            );
            return Some(location);
        }
        match self.device.current_position().await {
            Ok(location) if location.is_usable() => Some(location),
            Ok(location) => {
                warn!("Device reported unusable position {:?}", location);
                None
            }
            Err(LocationError::PermissionDenied) => {
                warn!("Location permission denied; continuing without a position");
                None
            }
            Err(e) => {
                warn!("Could not get device position: {}", e);
                None
            }
        }
    }

    async fn from_image(&self, image: &CapturedImage) -> Option<GeoLocation> {
        if image.is_remote() {
            return None;
        }
        match image.load().await {
            Ok(bytes) => exif::gps_location(&bytes),
            Err(e) => {
                debug!("Not reading metadata of {}: {}", image.uri(), e);
                None
            }
        }
    }
}
