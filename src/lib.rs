//! Client side of a license plate logbook: take a photo, find where it was
//! taken, read the plate, let the user fix it and save it to the backend.

pub mod backend_history;
pub mod config;
pub mod connectivity;
pub mod exif;
pub mod history;
pub mod location;
pub mod picker;
pub mod recognizer;
pub mod store;
pub mod types;
pub mod upload;
pub mod workflow;

pub use crate::backend_history::{BackendHistory, PendingDelete, RecordChanges};
pub use crate::config::Config;
pub use crate::connectivity::{Connectivity, ConnectivityProbe};
pub use crate::history::LocalHistoryStore;
pub use crate::location::{DeviceLocation, FixedLocation, LocationResolver, NoDeviceLocation};
pub use crate::picker::{FilePicker, ImagePicker, ImageSource};
pub use crate::recognizer::{HttpPlateRecognizer, PlateRecognizer};
pub use crate::store::{HttpRecordStore, RecordStore};
pub use crate::types::{
    CapturedImage, DraftRecord, GeoLocation, HistoryEntry, PersistedRecord, RecognitionResult,
};
pub use crate::workflow::{CaptureOutcome, CaptureWorkflow, CommitOutcome, Phase, WorkflowState};
