use crate::store::{RecordStore, StoreError};
use crate::types::{
    plate_matches, CapturedImage, DraftRecord, GeoLocation, PersistedRecord, RecognitionResult,
    ValidationError,
};
use failure::Fail;
use log::{info, warn};

#[derive(Debug, Fail)]
pub enum EditError {
    #[fail(display = "{}", _0)]
    Invalid(#[fail(cause)] ValidationError),
    #[fail(display = "{}", _0)]
    Store(#[fail(cause)] StoreError),
}

/// Field changes for an already saved record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChanges {
    pub plate_text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub confidence: f64,
}

impl From<&PersistedRecord> for RecordChanges {
    fn from(record: &PersistedRecord) -> Self {
        RecordChanges {
            plate_text: record.plate_text.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy_meters: record.accuracy_meters,
            confidence: record.confidence.unwrap_or(0.0),
        }
    }
}

impl RecordChanges {
    fn into_draft(self, image: CapturedImage) -> DraftRecord {
        let mut location = GeoLocation::new(self.latitude, self.longitude);
        location.accuracy_meters = self.accuracy_meters;
        DraftRecord::new(
            RecognitionResult::new(&self.plate_text, self.confidence),
            Some(location),
            image,
        )
    }
}

/// A delete that has been asked for but not yet confirmed.
#[derive(Debug, PartialEq)]
#[must_use = "a deletion only happens once confirmed"]
pub struct PendingDelete {
    id: i64,
}

impl PendingDelete {
    pub fn id(&self) -> i64 {
        self.id
    }
}

/// The list of saved records as browsed from the history screen.
pub struct BackendHistory<S> {
    store: S,
    records: Vec<PersistedRecord>,
}

impl<S: RecordStore> BackendHistory<S> {
    pub fn new(store: S) -> Self {
        BackendHistory {
            store,
            records: vec![],
        }
    }

    pub fn records(&self) -> &[PersistedRecord] {
        &self.records
    }

    pub async fn refresh(&mut self) -> Result<&[PersistedRecord], StoreError> {
        self.records = self.store.list().await?;
        Ok(&self.records)
    }

    /// Filters the last loaded list without a round trip.
    pub fn filter(&self, query: &str) -> Vec<&PersistedRecord> {
        self.records
            .iter()
            .filter(|r| plate_matches(&r.plate_text, query))
            .collect()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<PersistedRecord>, StoreError> {
        self.store.search(query).await
    }

    /// Validates like a capture commit, then updates the record and reloads the list.
    /// A failed reload does not fail the edit; the loaded row is patched instead.
    pub async fn edit(
        &mut self,
        id: i64,
        changes: RecordChanges,
        new_image: Option<CapturedImage>,
    ) -> Result<PersistedRecord, EditError> {
        let upload = new_image.is_some();
        let draft = changes.into_draft(new_image.unwrap_or_else(|| CapturedImage::from_uri("")));
        draft.validate().map_err(EditError::Invalid)?;
        let image = if upload { Some(&draft.image) } else { None };
        let updated = self
            .store
            .update(id, &draft.normalized(), image)
            .await
            .map_err(EditError::Store)?;
        if let Err(e) = self.refresh().await.map(|_| ()) {
            warn!("Record {} updated but the list could not be reloaded: {}", id, e);
            if let Some(row) = self.records.iter_mut().find(|r| r.id == id) {
                *row = updated.clone();
            }
        }
        Ok(updated)
    }

    pub fn request_delete(&self, id: i64) -> PendingDelete {
        PendingDelete { id }
    }

    pub async fn confirm_delete(&mut self, pending: PendingDelete) -> Result<(), StoreError> {
        self.store.delete(pending.id).await?;
        info!("Record {} deleted after confirmation", pending.id);
        if let Err(e) = self.refresh().await.map(|_| ()) {
            warn!("Record {} deleted but the list could not be reloaded: {}", pending.id, e);
            self.records.retain(|r| r.id != pending.id);
        }
        Ok(())
    }
}
