#![allow(dead_code)]

use bytes::Buf;
use futures::TryStreamExt;
use plate_logger::picker::PickError;
use plate_logger::recognizer::RecognitionError;
use plate_logger::store::StoreError;
use plate_logger::types::plate_matches;
use plate_logger::{
    CaptureWorkflow, CapturedImage, Connectivity, DeviceLocation, DraftRecord, ImagePicker,
    ImageSource, PersistedRecord, Phase, PlateRecognizer, RecognitionResult, RecordStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn jpeg_stub() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xD9]
}

#[derive(Clone)]
pub enum Pick {
    Image,
    Cancel,
    Deny,
}

#[derive(Clone)]
pub struct FakePicker {
    pick: Pick,
    pub calls: Arc<AtomicUsize>,
}

impl FakePicker {
    pub fn new(pick: Pick) -> Self {
        FakePicker {
            pick,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ImagePicker for FakePicker {
    async fn pick(&self, source: ImageSource) -> Result<Option<CapturedImage>, PickError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pick {
            Pick::Image => Ok(Some(CapturedImage::with_bytes("car.jpg", jpeg_stub()))),
            Pick::Cancel => Ok(None),
            Pick::Deny => Err(PickError::PermissionDenied(source)),
        }
    }
}

#[derive(Clone)]
pub struct FakeRecognizer {
    result: Option<(String, f64)>,
    pub calls: Arc<AtomicUsize>,
    pub gate: Option<Arc<Notify>>,
}

impl FakeRecognizer {
    pub fn plate(plate: &str, confidence: f64) -> Self {
        FakeRecognizer {
            result: Some((plate.to_string(), confidence)),
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        FakeRecognizer {
            result: None,
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    /// Holds every call until the returned `Notify` is signalled.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PlateRecognizer for FakeRecognizer {
    async fn recognize(&self, _image: &CapturedImage) -> Result<RecognitionResult, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.result {
            Some((plate, confidence)) => Ok(RecognitionResult::new(plate, *confidence)),
            None => Err(RecognitionError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct FakeStore {
    pub created: Arc<Mutex<Vec<DraftRecord>>>,
    pub updated: Arc<Mutex<Vec<(i64, DraftRecord, bool)>>>,
    pub deleted: Arc<Mutex<Vec<i64>>>,
    pub records: Arc<Mutex<Vec<PersistedRecord>>>,
    pub failures: Arc<AtomicUsize>,
    pub list_calls: Arc<AtomicUsize>,
    list_limit: Arc<AtomicUsize>,
    next_id: Arc<AtomicI64>,
    pub gate: Option<Arc<Notify>>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            created: Arc::new(Mutex::new(vec![])),
            updated: Arc::new(Mutex::new(vec![])),
            deleted: Arc::new(Mutex::new(vec![])),
            records: Arc::new(Mutex::new(vec![])),
            failures: Arc::new(AtomicUsize::new(0)),
            list_calls: Arc::new(AtomicUsize::new(0)),
            list_limit: Arc::new(AtomicUsize::new(usize::MAX)),
            next_id: Arc::new(AtomicI64::new(17)),
            gate: None,
        }
    }

    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// The next `n` writes fail with a 503.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every `list` after the first `n` fails with a 503.
    pub fn fail_lists_after(&self, n: usize) {
        self.list_limit.store(n, Ordering::SeqCst);
    }

    pub fn with_records(self, plates: &[(i64, &str)]) -> Self {
        {
            let mut records = self.records.lock().unwrap();
            for (id, plate) in plates {
                records.push(record(*id, plate, &DraftRecord::new(
                    RecognitionResult::new(plate, 0.5),
                    Some(plate_logger::GeoLocation::new(40.0, -3.0)),
                    CapturedImage::from_uri(""),
                )));
            }
        }
        self
    }

    pub fn created(&self) -> Vec<DraftRecord> {
        self.created.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        self.failures.store(left - 1, Ordering::SeqCst);
        Some(StoreError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

fn record(id: i64, plate: &str, draft: &DraftRecord) -> PersistedRecord {
    PersistedRecord {
        id,
        plate_text: plate.to_string(),
        latitude: draft.latitude().unwrap_or(0.0),
        longitude: draft.longitude().unwrap_or(0.0),
        accuracy_meters: draft.accuracy_meters(),
        confidence: Some(draft.confidence),
        image_filename: None,
        created_at: None,
    }
}

impl RecordStore for FakeStore {
    async fn create(
        &self,
        draft: &DraftRecord,
        _image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError> {
        self.created.lock().unwrap().push(draft.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let saved = record(id, &draft.plate_text, draft);
        self.records.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn update(
        &self,
        id: i64,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError> {
        self.updated
            .lock()
            .unwrap()
            .push((id, draft.clone(), image.is_some()));
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let saved = record(id, &draft.plate_text, draft);
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => *r = saved.clone(),
            None => {
                return Err(StoreError::Status {
                    status: 404,
                    body: "not found".to_string(),
                })
            }
        }
        Ok(saved)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(id);
        self.records.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.list_limit.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "busy".to_string(),
            });
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn search(&self, query: &str) -> Result<Vec<PersistedRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| plate_matches(&r.plate_text, query))
            .cloned()
            .collect())
    }
}

pub type FakeWorkflow<D> = CaptureWorkflow<FakeRecognizer, FakeStore, D>;

pub fn workflow<D: DeviceLocation>(
    recognizer: FakeRecognizer,
    store: FakeStore,
    device: D,
) -> FakeWorkflow<D> {
    CaptureWorkflow::new(recognizer, store, device, Connectivity::assume_online(), None)
}

/// Resolves once the workflow reaches `phase`.
pub async fn wait_for<R, S, D>(workflow: &CaptureWorkflow<R, S, D>, phase: Phase)
where
    R: PlateRecognizer,
    S: RecordStore,
    D: DeviceLocation,
{
    let mut rx = workflow.subscribe();
    let reached = async {
        loop {
            if rx.borrow().phase == phase {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), reached)
        .await
        .expect("workflow never reached the expected phase");
}

/// Collects a multipart body as field name → raw bytes. The last of repeated fields wins.
pub async fn read_form(
    form: warp::multipart::FormData,
) -> Result<HashMap<String, Vec<u8>>, warp::Rejection> {
    Ok(read_form_all(form).await?.into_iter().collect())
}

/// Collects every part in order, keeping repeated fields.
pub async fn read_form_all(
    form: warp::multipart::FormData,
) -> Result<Vec<(String, Vec<u8>)>, warp::Rejection> {
    form.and_then(|part| async move {
        let name = part.name().to_string();
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.extend_from_slice(buf.chunk());
                Ok::<_, warp::Error>(acc)
            })
            .await?;
        Ok::<_, warp::Error>((name, data))
    })
    .try_collect()
    .await
    .map_err(|_| warp::reject::reject())
}

pub fn text(fields: &HashMap<String, Vec<u8>>, name: &str) -> Option<String> {
    fields
        .get(name)
        .map(|v| String::from_utf8_lossy(v).to_string())
}
