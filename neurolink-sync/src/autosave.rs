//! Autosave coordinator: owns one pet document's load / mutate / save lifecycle.
//!
//! State machine:
//! ```text
//!            start_session            fetch ok / not found / error
//! Unbound ─────────────────► Loading ─────────────────────────────► Bound
//!    ▲                                                             │   ▲
//!    │ end_session (join in-flight, final save)      request_save │   │ write done
//!    └──────────────────────────────────────────────────────────── ▼   │
//!                                                                 Saving
//! ```
//!
//! At most one save per document is in flight: a request made while `Saving`
//! is coalesced into the running write and dispatches nothing. The save and
//! timer tasks are `JoinHandle`s owned here; the timer is aborted on session
//! end and the in-flight save is joined, never cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use neurolink_core::PetState;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::auth::Credential;
use crate::client::{DocumentPath, DocumentStore, PathError, StoreError};
use crate::config::AutosaveConfig;

/// Lifecycle state of the bound document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Loading,
    Bound,
    Saving,
}

/// How the live pet was obtained when the session bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored document was decoded.
    Restored,
    /// No document existed yet; a default pet was created.
    CreatedDefault,
    /// The load failed; a default pet is live and the error is reported here.
    Degraded(StoreError),
}

/// Result of a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRequest {
    /// A new write was started.
    Dispatched,
    /// A write was already in flight; this request rides on it.
    Coalesced,
    /// No document is bound (or it is still loading); nothing to save.
    NotBound,
}

/// Outcomes reported to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum AutosaveEvent {
    Bound { user_id: String, outcome: LoadOutcome },
    Saved { path: DocumentPath },
    SaveFailed { path: DocumentPath, error: StoreError },
    Unbound { user_id: String },
}

#[derive(Debug, Error)]
pub enum AutosaveError {
    #[error("a session is already bound for {0}")]
    AlreadyBound(String),
    #[error("no session is bound")]
    NotBound,
    #[error("invalid pet document path: {0}")]
    Path(#[from] PathError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
struct Binding {
    credential: Credential,
    path: DocumentPath,
}

struct Shared {
    pet: PetState,
    binding: Option<Binding>,
}

struct Core<S> {
    store: Arc<S>,
    config: AutosaveConfig,
    state: watch::Sender<SessionState>,
    shared: RwLock<Shared>,
    /// Handle of the most recent save task.
    in_flight: Mutex<Option<JoinHandle<Result<(), StoreError>>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Serializes `start_session` / `end_session`.
    lifecycle: Mutex<()>,
    event_tx: mpsc::Sender<AutosaveEvent>,
    saves_dispatched: AtomicU64,
}

/// Owns the live `PetState` of the signed-in user and keeps the store in sync.
pub struct AutosaveCoordinator<S: DocumentStore> {
    core: Arc<Core<S>>,
    event_rx: Option<mpsc::Receiver<AutosaveEvent>>,
}

impl<S: DocumentStore> AutosaveCoordinator<S> {
    pub fn new(store: Arc<S>, config: AutosaveConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Unbound);
        Self {
            core: Arc::new(Core {
                store,
                config,
                state,
                shared: RwLock::new(Shared {
                    pet: PetState::default(),
                    binding: None,
                }),
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                lifecycle: Mutex::new(()),
                event_tx,
                saves_dispatched: AtomicU64::new(0),
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<AutosaveEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> SessionState {
        *self.core.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.core.state.subscribe()
    }

    /// Number of writes dispatched since creation.
    pub fn saves_dispatched(&self) -> u64 {
        self.core.saves_dispatched.load(Ordering::SeqCst)
    }

    /// Identity of the bound session, if any.
    pub async fn user_id(&self) -> Option<String> {
        self.core
            .shared
            .read()
            .await
            .binding
            .as_ref()
            .map(|b| b.credential.user_id.clone())
    }

    /// Bind a session: load the user's pet document, or fall back to a default pet.
    ///
    /// A load failure other than "not found" still binds (with a default pet) and is
    /// reported as [`LoadOutcome::Degraded`].
    pub async fn start_session(&self, credential: Credential) -> Result<LoadOutcome, AutosaveError> {
        let _lifecycle = self.core.lifecycle.lock().await;
        if self.state() != SessionState::Unbound {
            let current = self.user_id().await.unwrap_or_default();
            return Err(AutosaveError::AlreadyBound(current));
        }
        let path = DocumentPath::pet_document(&credential.user_id)?;
        let user_id = credential.user_id.clone();
        self.core.state.send_replace(SessionState::Loading);
        log::info!("loading pet document {path}");

        let (pet, outcome) = match self.core.store.fetch(&path, &credential).await {
            Ok(document) => (PetState::from_record(&document.fields), LoadOutcome::Restored),
            Err(err) if err.is_not_found() => {
                log::info!("no pet document for {user_id}, creating a default pet");
                (PetState::default(), LoadOutcome::CreatedDefault)
            }
            Err(err) => {
                log::warn!("failed to load pet document {path}: {err}");
                (PetState::default(), LoadOutcome::Degraded(err))
            }
        };

        {
            let mut shared = self.core.shared.write().await;
            shared.pet = pet;
            shared.binding = Some(Binding { credential, path });
            self.core.state.send_replace(SessionState::Bound);
        }
        self.core.emit(AutosaveEvent::Bound {
            user_id,
            outcome: outcome.clone(),
        });
        self.start_timer().await;
        Ok(outcome)
    }

    /// Snapshot of the live pet, if a session is bound.
    pub async fn pet(&self) -> Option<PetState> {
        let shared = self.core.shared.read().await;
        shared.binding.as_ref().map(|_| shared.pet.clone())
    }

    /// Mutate the live pet in place. Returns `None` when no session is bound.
    ///
    /// Allowed while a save is running: the write carries the snapshot taken
    /// when it was dispatched.
    pub async fn update_pet<R>(&self, mutate: impl FnOnce(&mut PetState) -> R) -> Option<R> {
        let mut shared = self.core.shared.write().await;
        if shared.binding.is_none() {
            return None;
        }
        Some(mutate(&mut shared.pet))
    }

    /// Ask for a save without waiting for it.
    pub async fn request_save(&self) -> SaveRequest {
        self.core.request_save().await
    }

    /// Ask for a save and wait for the write it dispatched or was coalesced into.
    pub async fn save_now(&self) -> Result<SaveRequest, StoreError> {
        let request = self.core.request_save().await;
        if request == SaveRequest::NotBound {
            return Ok(request);
        }
        match self.core.join_in_flight().await {
            Some(result) => result.map(|()| request),
            None => Ok(request),
        }
    }

    /// Wait until no save is in flight.
    pub async fn wait_idle(&self) {
        self.core.wait_not_saving().await;
    }

    /// Leaving the pet view: stop periodic saves and save once.
    pub async fn leave(&self) -> SaveRequest {
        self.stop_timer().await;
        self.core.request_save().await
    }

    /// Back on the pet view: restart periodic saves.
    pub async fn resume(&self) {
        if matches!(self.state(), SessionState::Bound | SessionState::Saving) {
            self.start_timer().await;
        }
    }

    /// Log out: stop the timer, let any running save finish, write a final save,
    /// then drop the credential.
    ///
    /// The session is unbound even when the final save fails; that error is returned.
    pub async fn end_session(&self) -> Result<(), AutosaveError> {
        let _lifecycle = self.core.lifecycle.lock().await;
        if self.state() == SessionState::Unbound {
            return Err(AutosaveError::NotBound);
        }
        self.stop_timer().await;

        if let Some(Err(err)) = self.core.join_in_flight().await {
            log::warn!("save in flight at logout failed: {err}");
        }
        let final_save = match self.core.request_save().await {
            SaveRequest::NotBound => Ok(()),
            SaveRequest::Dispatched | SaveRequest::Coalesced => {
                self.core.join_in_flight().await.unwrap_or(Ok(()))
            }
        };

        // Unbind under the write lock: a racing request either registered its save
        // before this point or finds no binding afterwards.
        let user_id = {
            let mut shared = self.core.shared.write().await;
            shared.pet = PetState::default();
            self.core.state.send_replace(SessionState::Unbound);
            shared.binding.take().map(|b| b.credential.user_id)
        };
        if let Some(Err(err)) = self.core.join_in_flight().await {
            log::warn!("save racing logout failed: {err}");
        }
        let user_id = user_id.unwrap_or_default();
        log::info!("session for {user_id} unbound");
        self.core.emit(AutosaveEvent::Unbound { user_id });
        final_save.map_err(AutosaveError::from)
    }

    async fn start_timer(&self) {
        let period = self.core.config.interval;
        if period.is_zero() {
            return;
        }
        let mut timer = self.core.timer.lock().await;
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let core = Arc::clone(&self.core);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match core.request_save().await {
                    SaveRequest::Dispatched => log::debug!("periodic save dispatched"),
                    SaveRequest::Coalesced => log::debug!("periodic save coalesced"),
                    SaveRequest::NotBound => break,
                }
            }
        }));
    }

    async fn stop_timer(&self) {
        let handle = self.core.timer.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation surfaces as a JoinError; nothing else to report.
            let _ = handle.await;
        }
    }
}

impl<S: DocumentStore> Drop for AutosaveCoordinator<S> {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.core.timer.try_lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

impl<S: DocumentStore> Core<S> {
    fn emit(&self, event: AutosaveEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            log::warn!("autosave event channel full, dropping {event:?}");
        }
    }

    async fn request_save(self: &Arc<Self>) -> SaveRequest {
        let mut request = SaveRequest::NotBound;
        self.state.send_if_modified(|state| match *state {
            SessionState::Bound => {
                *state = SessionState::Saving;
                request = SaveRequest::Dispatched;
                true
            }
            SessionState::Saving => {
                request = SaveRequest::Coalesced;
                false
            }
            SessionState::Unbound | SessionState::Loading => false,
        });
        if request != SaveRequest::Dispatched {
            if request == SaveRequest::Coalesced {
                log::debug!("save already in flight, request coalesced");
            }
            return request;
        }

        // The read guard is held until the task is registered so `end_session`
        // cannot unbind between the binding check and the spawn.
        let shared = self.shared.read().await;
        let Some(binding) = shared.binding.clone() else {
            drop(shared);
            self.finish_saving();
            return SaveRequest::NotBound;
        };
        let pet = shared.pet.clone();

        // Hold the slot while spawning so a newer handle is never overwritten by an older one.
        let mut slot = self.in_flight.lock().await;
        self.saves_dispatched.fetch_add(1, Ordering::SeqCst);
        let core = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { core.run_save(pet, binding).await }));
        SaveRequest::Dispatched
    }

    /// `Saving → Bound`; leaves any other state (a logout in between) untouched.
    fn finish_saving(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Saving {
                *state = SessionState::Bound;
                true
            } else {
                false
            }
        });
    }

    async fn run_save(&self, pet: PetState, binding: Binding) -> Result<(), StoreError> {
        let record = pet.to_record();
        let result = self
            .store
            .create_or_replace(&binding.path, &record, &binding.credential)
            .await
            .map(|_| ());

        match &result {
            Ok(()) => {
                log::debug!("saved {}", binding.path);
                self.emit(AutosaveEvent::Saved {
                    path: binding.path.clone(),
                });
            }
            Err(err) => {
                log::warn!("failed to save {}: {err}", binding.path);
                self.emit(AutosaveEvent::SaveFailed {
                    path: binding.path.clone(),
                    error: err.clone(),
                });
            }
        }
        self.finish_saving();
        result
    }

    /// Join the most recent save task.
    ///
    /// Returns `None` when another caller already joined it; in that case this
    /// still waits until the state has left `Saving`.
    async fn join_in_flight(&self) -> Option<Result<(), StoreError>> {
        let handle = self.in_flight.lock().await.take();
        match handle {
            Some(handle) => Some(handle.await.unwrap_or_else(|e| {
                Err(StoreError::network(format!("save task ended abnormally: {e}")))
            })),
            None => {
                self.wait_not_saving().await;
                None
            }
        }
    }

    async fn wait_not_saving(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state != SessionState::Saving).await;
    }
}
