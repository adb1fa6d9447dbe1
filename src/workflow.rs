//! The capture cycle: photo → position → plate → review → save.
//!
//! A `CaptureWorkflow` is a cheap handle around shared state, so a UI task can
//! keep sending intents (edit, discard, abandon) while another task awaits a
//! stage. Every stage re-checks the cycle id once it resumes; a result that
//! belongs to an abandoned cycle is dropped instead of applied.

use crate::connectivity::Connectivity;
use crate::history::LocalHistoryStore;
use crate::location::{DeviceLocation, LocationResolver};
use crate::picker::{ImagePicker, ImageSource};
use crate::recognizer::{PlateRecognizer, RecognitionError};
use crate::store::{RecordStore, StoreError};
use crate::types::{
    display_plate, CapturedImage, DraftRecord, GeoLocation, HistoryEntry, PersistedRecord,
    ValidationError,
};
use failure::Fail;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    LocationResolving,
    Recognizing,
    AwaitingReview,
    Committing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Saved(String),
    Error(String),
}

/// Everything the UI needs to render the capture screen.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub phase: Phase,
    pub cycle: u64,
    pub draft: Option<DraftRecord>,
    pub notice: Option<Notice>,
    pub last_saved: Option<PersistedRecord>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState {
            phase: Phase::Idle,
            cycle: 0,
            draft: None,
            notice: None,
            last_saved: None,
        }
    }
}

#[derive(Debug, Fail)]
pub enum WorkflowError {
    #[fail(display = "Recognition failed: {}", _0)]
    Recognition(#[fail(cause)] RecognitionError),
    #[fail(display = "Saving failed: {}", _0)]
    Persistence(#[fail(cause)] StoreError),
    #[fail(display = "Invalid record: {}", _0)]
    Validation(#[fail(cause)] ValidationError),
    #[fail(display = "Backend is not reachable")]
    Offline,
    #[fail(display = "No record is awaiting review")]
    NotReviewing,
}

impl WorkflowError {
    /// Text safe to show the user; details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Recognition(_) => {
                "Could not recognize a plate in this photo. Please try another photo.".to_string()
            }
            WorkflowError::Persistence(_) => {
                "The plate was recognized but could not be saved to the server. You can try saving again."
                    .to_string()
            }
            WorkflowError::Validation(e) => format!("{}", e),
            WorkflowError::Offline => {
                "There is no connection to the server. The plate cannot be saved right now."
                    .to_string()
            }
            WorkflowError::NotReviewing => "There is no plate waiting to be saved.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Recognition finished; the draft now awaits review.
    Review(DraftRecord),
    Cancelled,
    /// Another cycle was already running.
    Ignored,
    /// The cycle was abandoned while this call was in flight.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Saved(PersistedRecord),
    Ignored,
    Abandoned,
}

const TRANSITION_BUFFER: usize = 64;

struct Shared<R, S, D> {
    recognizer: R,
    store: S,
    locator: LocationResolver<D>,
    history: Option<Arc<LocalHistoryStore>>,
    connectivity: Connectivity,
    state: Mutex<WorkflowState>,
    events: watch::Sender<WorkflowState>,
    transitions: broadcast::Sender<(u64, Phase)>,
}

pub struct CaptureWorkflow<R, S, D> {
    shared: Arc<Shared<R, S, D>>,
}

impl<R, S, D> Clone for CaptureWorkflow<R, S, D> {
    fn clone(&self) -> Self {
        CaptureWorkflow {
            shared: self.shared.clone(),
        }
    }
}

impl<R, S, D> CaptureWorkflow<R, S, D>
where
    R: PlateRecognizer,
    S: RecordStore,
    D: DeviceLocation,
{
    pub fn new(
        recognizer: R,
        store: S,
        device: D,
        connectivity: Connectivity,
        history: Option<Arc<LocalHistoryStore>>,
    ) -> Self {
        let (events, _) = watch::channel(WorkflowState::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        CaptureWorkflow {
            shared: Arc::new(Shared {
                recognizer,
                store,
                locator: LocationResolver::new(device),
                history,
                connectivity,
                state: Mutex::new(WorkflowState::default()),
                events,
                transitions,
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.shared.events.borrow().clone()
    }

    /// Latest snapshot only; a slow reader skips the transient phases.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.shared.events.subscribe()
    }

    /// Every published `(cycle, phase)` in order, including `Done` and `Failed`.
    pub fn transitions(&self) -> broadcast::Receiver<(u64, Phase)> {
        self.shared.transitions.subscribe()
    }

    fn publish(&self, state: &WorkflowState) {
        debug!("Cycle {} is now {:?}", state.cycle, state.phase);
        self.shared.events.send_replace(state.clone());
        // No receivers is fine.
        let _ = self.shared.transitions.send((state.cycle, state.phase));
    }

    /// Moves `cycle` to `phase` unless it has been abandoned meanwhile.
    async fn advance(&self, cycle: u64, phase: Phase) -> bool {
        let mut state = self.shared.state.lock().await;
        if state.cycle != cycle {
            info!("Cycle {} was abandoned before {:?}", cycle, phase);
            return false;
        }
        state.phase = phase;
        self.publish(&state);
        true
    }

    async fn cancel(&self, cycle: u64) -> CaptureOutcome {
        let mut state = self.shared.state.lock().await;
        if state.cycle != cycle {
            return CaptureOutcome::Abandoned;
        }
        state.phase = Phase::Idle;
        self.publish(&state);
        CaptureOutcome::Cancelled
    }

    /// Runs a capture cycle up to the review step. A no-op unless idle.
    pub async fn capture<P: ImagePicker>(
        &self,
        picker: &P,
        source: ImageSource,
    ) -> Result<CaptureOutcome, WorkflowError> {
        let cycle = {
            let mut state = self.shared.state.lock().await;
            if state.phase != Phase::Idle {
                debug!("Ignoring capture request while {:?}", state.phase);
                return Ok(CaptureOutcome::Ignored);
            }
            state.cycle += 1;
            state.phase = Phase::Capturing;
            state.draft = None;
            state.notice = None;
            self.publish(&state);
            state.cycle
        };
        info!("Cycle {}: capturing from {:?}", cycle, source);

        let image = match picker.pick(source).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                info!("Cycle {}: picker cancelled", cycle);
                return Ok(self.cancel(cycle).await);
            }
            Err(e) => {
                warn!("Cycle {}: could not get an image: {}", cycle, e);
                return Ok(self.cancel(cycle).await);
            }
        };

        if !self.advance(cycle, Phase::LocationResolving).await {
            return Ok(CaptureOutcome::Abandoned);
        }
        let location = self.shared.locator.resolve(&image).await;
        if location.is_none() {
            warn!("Cycle {}: no position, continuing without one", cycle);
        }

        if !self.advance(cycle, Phase::Recognizing).await {
            return Ok(CaptureOutcome::Abandoned);
        }
        let recognized = self.shared.recognizer.recognize(&image).await;

        let mut state = self.shared.state.lock().await;
        if state.cycle != cycle {
            info!("Cycle {}: dropping recognition result of abandoned cycle", cycle);
            return Ok(CaptureOutcome::Abandoned);
        }
        let result = match recognized {
            Ok(result) => result,
            Err(e) => {
                error!("Cycle {}: recognition failed: {}", cycle, e);
                let err = WorkflowError::Recognition(e);
                state.notice = Some(Notice::Error(err.user_message()));
                state.phase = Phase::Failed;
                self.publish(&state);
                state.phase = Phase::Idle;
                self.publish(&state);
                return Err(err);
            }
        };
        let draft = DraftRecord::new(result, location, image);
        state.draft = Some(draft.clone());
        state.phase = Phase::AwaitingReview;
        self.publish(&state);
        drop(state);

        info!("Cycle {}: plate {} awaiting review", cycle, draft.plate_text);
        self.record_offline(&draft).await;
        Ok(CaptureOutcome::Review(draft))
    }

    async fn record_offline(&self, draft: &DraftRecord) {
        if self.shared.connectivity.is_online() {
            return;
        }
        if let Some(history) = &self.shared.history {
            let entry = HistoryEntry::new(&draft.plate_text, draft.location);
            if let Err(e) = history.add(&entry).await {
                error!("Could not store plate {} in local history: {}", entry.plate_text, e);
            }
        }
    }

    async fn edit<F: FnOnce(&mut DraftRecord)>(&self, apply: F) -> Result<DraftRecord, WorkflowError> {
        let mut state = self.shared.state.lock().await;
        if state.phase != Phase::AwaitingReview {
            return Err(WorkflowError::NotReviewing);
        }
        let draft = match state.draft.as_mut() {
            Some(d) => d,
            None => return Err(WorkflowError::NotReviewing),
        };
        apply(draft);
        let edited = draft.clone();
        state.notice = None;
        self.publish(&state);
        Ok(edited)
    }

    pub async fn edit_plate(&self, text: &str) -> Result<DraftRecord, WorkflowError> {
        let plate = display_plate(text);
        self.edit(|d| d.plate_text = plate).await
    }

    pub async fn edit_location(&self, location: GeoLocation) -> Result<DraftRecord, WorkflowError> {
        self.edit(|d| d.location = Some(location)).await
    }

    pub async fn replace_image(&self, image: CapturedImage) -> Result<DraftRecord, WorkflowError> {
        self.edit(|d| d.image = image).await
    }

    /// Saves the draft. Validation and offline errors leave the review open;
    /// a failed save keeps the draft so the user can simply try again.
    pub async fn commit(&self) -> Result<CommitOutcome, WorkflowError> {
        let (cycle, draft) = {
            let mut state = self.shared.state.lock().await;
            if state.phase != Phase::AwaitingReview {
                debug!("Ignoring commit while {:?}", state.phase);
                return Ok(CommitOutcome::Ignored);
            }
            let draft = match &state.draft {
                Some(d) => d.clone(),
                None => return Ok(CommitOutcome::Ignored),
            };
            let blocked = match draft.validate() {
                Err(e) => Some(WorkflowError::Validation(e)),
                Ok(_) if !self.shared.connectivity.is_online() => Some(WorkflowError::Offline),
                Ok(_) => None,
            };
            if let Some(err) = blocked {
                warn!("Cycle {}: commit blocked: {}", state.cycle, err);
                state.notice = Some(Notice::Error(err.user_message()));
                self.publish(&state);
                return Err(err);
            }
            state.phase = Phase::Committing;
            state.notice = None;
            self.publish(&state);
            (state.cycle, draft)
        };

        let image = if draft.image.is_remote() {
            None
        } else {
            Some(&draft.image)
        };
        let saved = self.shared.store.create(&draft.normalized(), image).await;

        let mut state = self.shared.state.lock().await;
        if state.cycle != cycle {
            info!("Cycle {}: dropping save result of abandoned cycle", cycle);
            return Ok(CommitOutcome::Abandoned);
        }
        match saved {
            Ok(record) => {
                info!("Cycle {}: saved as record {}", cycle, record.id);
                state.phase = Phase::Done;
                state.draft = None;
                state.notice = Some(Notice::Saved(format!(
                    "Plate {} saved",
                    record.plate_text
                )));
                state.last_saved = Some(record.clone());
                self.publish(&state);
                state.phase = Phase::Idle;
                self.publish(&state);
                Ok(CommitOutcome::Saved(record))
            }
            Err(e) => {
                error!("Cycle {}: saving failed: {}", cycle, e);
                let err = WorkflowError::Persistence(e);
                state.notice = Some(Notice::Error(err.user_message()));
                state.phase = Phase::Failed;
                self.publish(&state);
                state.phase = Phase::AwaitingReview;
                self.publish(&state);
                Err(err)
            }
        }
    }

    /// Drops the draft without saving. Only meaningful during review.
    pub async fn discard(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        if state.phase != Phase::AwaitingReview {
            return false;
        }
        info!("Cycle {}: draft discarded", state.cycle);
        state.draft = None;
        state.notice = None;
        state.phase = Phase::Idle;
        self.publish(&state);
        true
    }

    /// The screen went away: forget the current cycle whatever it is doing.
    /// Calls already in flight finish, but their results are dropped.
    pub async fn abandon(&self) {
        let mut state = self.shared.state.lock().await;
        if state.phase == Phase::Idle {
            return;
        }
        info!("Cycle {} abandoned while {:?}", state.cycle, state.phase);
        state.cycle += 1;
        state.draft = None;
        state.phase = Phase::Idle;
        self.publish(&state);
    }
}
