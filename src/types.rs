use bytes::Bytes;
use failure::Fail;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

/// Plates are free-form but never longer than this.
pub const MAX_PLATE_LEN: usize = 10;

/// Reference to a photo taken or picked for one capture cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    uri: String,
    bytes: Option<Bytes>,
}

impl CapturedImage {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        CapturedImage {
            uri: uri.into(),
            bytes: None,
        }
    }

    pub fn with_bytes(uri: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        CapturedImage {
            uri: uri.into(),
            bytes: Some(bytes.into()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn bytes(&self) -> Option<&Bytes> {
        self.bytes.as_ref()
    }

    /// True for images living behind an http(s) URL we have no bytes for.
    pub fn is_remote(&self) -> bool {
        self.bytes.is_none() && (self.uri.starts_with("http://") || self.uri.starts_with("https://"))
    }

    /// Name used for the multipart file part; falls back to a generic one.
    pub fn file_name(&self) -> String {
        self.uri
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .filter(|name| !name.is_empty() && !name.starts_with("data:"))
            .map(|name| name.split('?').next().unwrap_or(name).to_string())
            .unwrap_or_else(|| "image.jpg".to_string())
    }

    pub fn local_path(&self) -> io::Result<PathBuf> {
        if self.uri.starts_with("file://") {
            let url = Url::parse(&self.uri)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            return url.to_file_path().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Not a local file URI: {}", self.uri),
                )
            });
        }
        if self.uri.contains("://") || self.uri.starts_with("data:") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Cannot read image from {}", self.uri),
            ));
        }
        Ok(Path::new(&self.uri).to_path_buf())
    }

    /// Returns the raw bytes, reading the backing file when only a URI is known.
    pub async fn load(&self) -> io::Result<Bytes> {
        if let Some(bytes) = &self.bytes {
            return Ok(bytes.clone());
        }
        let path = self.local_path()?;
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub captured_at_epoch_ms: i64,
}

impl GeoLocation {
    /// (0,0) stands for "unknown" wherever a location is mandatory.
    pub const UNKNOWN: GeoLocation = GeoLocation {
        latitude: 0.0,
        longitude: 0.0,
        accuracy_meters: None,
        captured_at_epoch_ms: 0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoLocation {
            latitude,
            longitude,
            accuracy_meters: None,
            captured_at_epoch_ms: now_epoch_ms(),
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_meters = Some(meters);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn is_usable(&self) -> bool {
        !self.is_unknown() && self.in_range()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub plate_text: String,
    pub confidence: f64,
}

impl RecognitionResult {
    pub fn new(plate_text: &str, confidence: f64) -> Self {
        RecognitionResult {
            plate_text: display_plate(plate_text),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.max(0.0).min(1.0)
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftRecord {
    pub plate_text: String,
    pub location: Option<GeoLocation>,
    pub confidence: f64,
    pub image: CapturedImage,
}

impl DraftRecord {
    pub fn new(
        result: RecognitionResult,
        location: Option<GeoLocation>,
        image: CapturedImage,
    ) -> Self {
        DraftRecord {
            plate_text: display_plate(&result.plate_text),
            location,
            confidence: result.confidence,
            image,
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        self.location.map(|l| l.latitude)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.location.map(|l| l.longitude)
    }

    pub fn accuracy_meters(&self) -> Option<f64> {
        self.location.and_then(|l| l.accuracy_meters)
    }

    /// Checks the commit preconditions and returns the plate as it will be stored.
    pub fn validate(&self) -> Result<(String, GeoLocation), ValidationError> {
        let plate = commit_plate(&self.plate_text);
        if plate.is_empty() {
            return Err(ValidationError::EmptyPlate);
        }
        let location = self.location.ok_or(ValidationError::MissingLocation)?;
        if location.is_unknown() {
            return Err(ValidationError::ZeroCoordinates);
        }
        if !location.in_range() {
            return Err(ValidationError::CoordinatesOutOfRange {
                latitude: location.latitude,
                longitude: location.longitude,
            });
        }
        Ok((plate, location))
    }

    /// Copy of the draft with the plate in its stored form.
    pub fn normalized(&self) -> DraftRecord {
        DraftRecord {
            plate_text: commit_plate(&self.plate_text),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Fail)]
pub enum ValidationError {
    #[fail(display = "The plate cannot be empty")]
    EmptyPlate,
    #[fail(display = "The location of the photo is unknown")]
    MissingLocation,
    #[fail(display = "The coordinates cannot be 0,0")]
    ZeroCoordinates,
    #[fail(display = "The coordinates {},{} are out of range", latitude, longitude)]
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: i64,
    #[serde(rename = "plate")]
    pub plate_text: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, rename = "accuracy")]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "imageFilename")]
    pub image_filename: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub plate_text: String,
    pub location: GeoLocation,
    pub recognized_at_epoch_ms: i64,
}

impl HistoryEntry {
    pub fn new(plate_text: &str, location: Option<GeoLocation>) -> Self {
        HistoryEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            plate_text: display_plate(plate_text),
            location: location.unwrap_or(GeoLocation::UNKNOWN),
            recognized_at_epoch_ms: now_epoch_ms(),
        }
    }
}

/// Uppercased and cut to `MAX_PLATE_LEN`, as shown in the edit field.
pub fn display_plate(text: &str) -> String {
    text.to_uppercase().chars().take(MAX_PLATE_LEN).collect()
}

/// The form a plate is stored in.
pub fn commit_plate(text: &str) -> String {
    display_plate(text.trim())
}

pub fn plate_matches(plate: &str, query: &str) -> bool {
    plate.to_lowercase().contains(&query.to_lowercase())
}

pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
