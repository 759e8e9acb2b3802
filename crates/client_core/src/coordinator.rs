//! Attendance state machine.
//!
//! Three sources feed the coordinator: the initial fetch of the backend's
//! current location, manual picker selections and QR detections. Each entry
//! point produces at most one transition; a transition issues at most two
//! session operations, always awaited in order, so the backend never sees a
//! second session opened before the first one was closed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{Location, LocationId, Origin, SessionId, UserId},
    error::{ApiError, ErrorKind},
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    error::SessionError,
    location_directory::LocationDirectory,
    selection::{Selection, SelectionStore},
    session_service::{LocationSource, SessionOps},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceState {
    Absent,
    CheckedIn {
        location: Location,
        since: DateTime<Utc>,
    },
}

impl AttendanceState {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Absent => None,
            Self::CheckedIn { location, .. } => Some(location),
        }
    }

    pub fn selection(&self) -> Selection {
        match self {
            Self::Absent => Selection::Absent,
            Self::CheckedIn { location, .. } => Selection::Location(location.name.clone()),
        }
    }

    fn holds(&self, target: &Target) -> bool {
        match (self, target) {
            (Self::Absent, Target::Absent) => true,
            (Self::CheckedIn { location, .. }, Target::Location(target)) => location.id == target.id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Absent,
    Location(Location),
}

impl From<Option<Location>> for Target {
    fn from(value: Option<Location>) -> Self {
        value.map_or(Self::Absent, Self::Location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub origin: Origin,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    ClockIn(LocationId),
    ClockOut,
    EditSession {
        session_id: SessionId,
        location_id: LocationId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    },
    DeleteSession(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutcome {
    pub op: SessionOp,
    pub result: Result<(), ErrorKind>,
}

impl OpOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyCurrent,
    UnknownLocation,
    InvalidPayload,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Ignored {
        origin: Origin,
        reason: IgnoreReason,
    },
    Applied {
        request: TransitionRequest,
        state: AttendanceState,
        outcomes: Vec<OpOutcome>,
    },
}

impl TransitionOutcome {
    pub fn ops(&self) -> Vec<SessionOp> {
        match self {
            Self::Ignored { .. } => Vec::new(),
            Self::Applied { outcomes, .. } => outcomes.iter().map(|o| o.op.clone()).collect(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub enum AttendanceEvent {
    StateChanged {
        state: AttendanceState,
        origin: Origin,
    },
    OperationCompleted(OpOutcome),
    Ignored {
        origin: Origin,
        reason: IgnoreReason,
    },
    SyncFailed(ApiError),
}

/// Operations needed to move from `current` to `target`. Empty when the
/// target is already held.
pub fn plan_transition(current: &AttendanceState, target: &Target) -> Vec<SessionOp> {
    if current.holds(target) {
        return Vec::new();
    }
    match (current, target) {
        (AttendanceState::Absent, Target::Location(location)) => {
            vec![SessionOp::ClockIn(location.id)]
        }
        (AttendanceState::CheckedIn { .. }, Target::Absent) => vec![SessionOp::ClockOut],
        (AttendanceState::CheckedIn { .. }, Target::Location(location)) => {
            vec![SessionOp::ClockOut, SessionOp::ClockIn(location.id)]
        }
        (AttendanceState::Absent, Target::Absent) => Vec::new(),
    }
}

pub struct AttendanceCoordinator {
    sessions: Arc<dyn SessionOps>,
    locations: Arc<dyn LocationSource>,
    directory: Arc<LocationDirectory>,
    selection: SelectionStore,
    state: watch::Sender<AttendanceState>,
    events: broadcast::Sender<AttendanceEvent>,
    last_outcomes: Vec<OpOutcome>,
}

impl AttendanceCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionOps>,
        locations: Arc<dyn LocationSource>,
        directory: Arc<LocationDirectory>,
    ) -> Self {
        let (state, _) = watch::channel(AttendanceState::Absent);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions,
            locations,
            directory,
            selection: SelectionStore::new(),
            state,
            events,
            last_outcomes: Vec::new(),
        }
    }

    pub fn from_backend<B>(backend: Arc<B>, directory: Arc<LocationDirectory>) -> Self
    where
        B: SessionOps + LocationSource + 'static,
    {
        Self::new(backend.clone(), backend, directory)
    }

    pub fn state(&self) -> AttendanceState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AttendanceState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<AttendanceEvent> {
        self.events.clone()
    }

    pub fn selection(&self) -> &SelectionStore {
        &self.selection
    }

    pub fn directory(&self) -> &Arc<LocationDirectory> {
        &self.directory
    }

    /// Results of the operations issued by the most recent applied transition.
    /// State is never rolled back on failure; callers that want to reconcile
    /// read these alongside [`Self::state`].
    pub fn last_outcomes(&self) -> &[OpOutcome] {
        &self.last_outcomes
    }

    pub async fn refresh_directory(&self) -> Result<usize, SessionError> {
        self.directory.load(self.locations.as_ref()).await
    }

    /// Mirrors backend truth without issuing any session operation.
    pub fn on_initial_fetch(&mut self, location: Option<Location>) -> TransitionOutcome {
        let target = Target::from(location);
        if self.state.borrow().holds(&target) {
            self.selection.write_system(self.state.borrow().selection());
            return self.ignore(Origin::InitialFetch, IgnoreReason::AlreadyCurrent);
        }

        let next = Self::state_for(&target);
        info!(selection = %next.selection(), "attendance: mirrored backend location");
        self.apply(next.clone(), Origin::InitialFetch);
        self.last_outcomes.clear();
        TransitionOutcome::Applied {
            request: TransitionRequest {
                origin: Origin::InitialFetch,
                target,
            },
            state: next,
            outcomes: Vec::new(),
        }
    }

    pub async fn sync_from_backend(
        &mut self,
        user_id: UserId,
    ) -> Result<TransitionOutcome, SessionError> {
        let location = self.sessions.current_location(user_id).await.inspect_err(|err| {
            warn!(user_id = user_id.0, error = %err, "attendance: current location fetch failed");
            let _ = self.events.send(AttendanceEvent::SyncFailed(ApiError::from(err)));
        })?;
        Ok(self.on_initial_fetch(location))
    }

    pub async fn on_manual_select(&mut self, target: Selection) -> TransitionOutcome {
        let target = match target {
            Selection::Absent => Target::Absent,
            Selection::Location(name) => {
                if self.state.borrow().location().map(|l| l.name.as_str()) == Some(name.as_str()) {
                    return self.ignore(Origin::Manual, IgnoreReason::AlreadyCurrent);
                }
                match self.directory.resolve_by_name(&name) {
                    Some(location) => Target::Location(location),
                    None => {
                        debug!(name = %name, "attendance: selection names no known location");
                        return self.ignore(Origin::Manual, IgnoreReason::UnknownLocation);
                    }
                }
            }
        };
        self.transition(TransitionRequest {
            origin: Origin::Manual,
            target,
        })
        .await
    }

    pub async fn on_detect(&mut self, candidate: LocationId) -> TransitionOutcome {
        let Some(location) = self.directory.resolve(candidate) else {
            debug!(candidate = candidate.0, "attendance: detection of unknown location dropped");
            return self.ignore(Origin::Detection, IgnoreReason::UnknownLocation);
        };
        self.transition(TransitionRequest {
            origin: Origin::Detection,
            target: Target::Location(location),
        })
        .await
    }

    /// Raw QR payload: a decimal location id. Anything else is ignored.
    pub async fn on_detect_payload(&mut self, payload: &str) -> TransitionOutcome {
        match payload.trim().parse::<i64>() {
            Ok(id) => self.on_detect(LocationId(id)).await,
            Err(_) => {
                debug!(payload, "attendance: non-numeric detection payload dropped");
                self.ignore(Origin::Detection, IgnoreReason::InvalidPayload)
            }
        }
    }

    /// Explicit "go absent". The picker is reset to `Absent` even when no
    /// transition was needed.
    pub async fn request_checkout(&mut self) -> TransitionOutcome {
        self.on_manual_select(Selection::Absent).await
    }

    /// Points the picker back at the held state when a user pick did not
    /// lead there.
    pub fn reconcile_selection(&self) {
        let held = self.state.borrow().selection();
        if self.selection.current() != held {
            debug!(selection = %held, "attendance: picker reset to held state");
            self.selection.write_system(held);
        }
    }

    async fn transition(&mut self, request: TransitionRequest) -> TransitionOutcome {
        let current = self.state();
        if current.holds(&request.target) {
            return self.ignore(request.origin, IgnoreReason::AlreadyCurrent);
        }

        let ops = plan_transition(&current, &request.target);
        let next = Self::state_for(&request.target);
        info!(
            origin = ?request.origin,
            from = %current.selection(),
            to = %next.selection(),
            ops = ops.len(),
            "attendance: transition"
        );

        // Optimistic: published before the backend has answered.
        self.apply(next.clone(), request.origin);

        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let result = self.sessions.execute(&op).await.map_err(|err| err.kind());
            if let Err(kind) = &result {
                warn!(op = ?op, error = ?kind, "attendance: session operation failed; state kept");
            }
            let outcome = OpOutcome { op, result };
            let _ = self
                .events
                .send(AttendanceEvent::OperationCompleted(outcome.clone()));
            outcomes.push(outcome);
        }
        self.last_outcomes = outcomes.clone();

        TransitionOutcome::Applied {
            request,
            state: next,
            outcomes,
        }
    }

    fn state_for(target: &Target) -> AttendanceState {
        match target {
            Target::Absent => AttendanceState::Absent,
            Target::Location(location) => AttendanceState::CheckedIn {
                location: location.clone(),
                since: Utc::now(),
            },
        }
    }

    fn apply(&mut self, next: AttendanceState, origin: Origin) {
        self.selection.write_system(next.selection());
        self.state.send_replace(next.clone());
        let _ = self
            .events
            .send(AttendanceEvent::StateChanged { state: next, origin });
    }

    fn ignore(&self, origin: Origin, reason: IgnoreReason) -> TransitionOutcome {
        if origin == Origin::Manual {
            self.reconcile_selection();
        }
        let _ = self.events.send(AttendanceEvent::Ignored { origin, reason });
        TransitionOutcome::Ignored { origin, reason }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
