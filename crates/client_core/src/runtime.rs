//! Task that owns the coordinator and serializes every trigger.
//!
//! Requests that arrive while a transition's session operations are still in
//! flight wait in the command queue. With [`QueuePolicy::Fifo`] they run in
//! arrival order; with [`QueuePolicy::Coalesce`] only the newest queued trigger
//! survives once the in-flight transition completes.

use std::{str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{Location, LocationId, Origin, UserId},
    error::ApiError,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    coordinator::{
        AttendanceCoordinator, AttendanceEvent, AttendanceState, IgnoreReason, TransitionOutcome,
    },
    location_directory::LocationDirectory,
    selection::{Selection, SelectionStore},
};

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    #[default]
    Fifo,
    Coalesce,
}

impl FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "coalesce" | "latest" => Ok(Self::Coalesce),
            other => Err(format!("unknown queue policy '{other}' (expected fifo|coalesce)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceCommand {
    InitialFetch(Option<Location>),
    Sync(UserId),
    RefreshDirectory,
    ManualSelect(Selection),
    Detect(LocationId),
    DetectPayload(String),
    Checkout,
}

impl AttendanceCommand {
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::InitialFetch(_) => "initial_fetch",
            Self::Sync(_) => "sync",
            Self::RefreshDirectory => "refresh_directory",
            Self::ManualSelect(_) => "manual_select",
            Self::Detect(_) => "detect",
            Self::DetectPayload(_) => "detect_payload",
            Self::Checkout => "checkout",
        }
    }

    /// User or scanner triggers; only these are subject to coalescing.
    fn trigger_origin(&self) -> Option<Origin> {
        match self {
            Self::ManualSelect(_) | Self::Checkout => Some(Origin::Manual),
            Self::Detect(_) | Self::DetectPayload(_) => Some(Origin::Detection),
            Self::InitialFetch(_) | Self::Sync(_) | Self::RefreshDirectory => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Transition(TransitionOutcome),
    DirectoryLoaded(usize),
    Failed(ApiError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("attendance command queue is full")]
    Full,
    #[error("attendance coordinator has stopped")]
    Closed,
}

struct Envelope {
    command: AttendanceCommand,
    reply: Option<oneshot::Sender<CommandReply>>,
}

impl Envelope {
    fn respond(self, reply: CommandReply) {
        if let Some(tx) = self.reply {
            let _ = tx.send(reply);
        }
    }
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Envelope>,
    selection: SelectionStore,
    directory: Arc<LocationDirectory>,
    state: watch::Receiver<AttendanceState>,
    events: broadcast::Sender<AttendanceEvent>,
}

impl CoordinatorHandle {
    /// Queues a command without waiting for it to run.
    pub fn submit(&self, command: AttendanceCommand) -> Result<(), DispatchError> {
        let name = command.command_name();
        self.commands
            .try_send(Envelope {
                command,
                reply: None,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DispatchError::Full,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })?;
        debug!(command = name, "attendance: queued command");
        Ok(())
    }

    /// Queues a command and waits until the coordinator has processed it.
    pub async fn request(&self, command: AttendanceCommand) -> Result<CommandReply, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Envelope {
                command,
                reply: Some(tx),
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Picker change notification from the UI. Echoes of coordinator writes are
    /// swallowed here; anything else becomes a manual selection. Returns whether
    /// a command was queued.
    pub fn selection_changed(&self, value: Selection) -> Result<bool, DispatchError> {
        let previous = self.selection.current();
        let Some(selection) = self.selection.observe_change(value) else {
            return Ok(false);
        };
        if let Err(err) = self.submit(AttendanceCommand::ManualSelect(selection)) {
            // Nothing will act on the pick; show the previous value again.
            self.selection.write_system(previous);
            return Err(err);
        }
        Ok(true)
    }

    pub fn state(&self) -> AttendanceState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AttendanceState> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.events.subscribe()
    }

    pub fn selection(&self) -> &SelectionStore {
        &self.selection
    }

    pub fn directory(&self) -> &Arc<LocationDirectory> {
        &self.directory
    }
}

pub fn spawn(
    coordinator: AttendanceCoordinator,
    policy: QueuePolicy,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let handle = CoordinatorHandle {
        commands,
        selection: coordinator.selection().clone(),
        directory: Arc::clone(coordinator.directory()),
        state: coordinator.subscribe_state(),
        events: coordinator.event_sender(),
    };
    let task = tokio::spawn(run(coordinator, rx, policy));
    (handle, task)
}

async fn run(
    mut coordinator: AttendanceCoordinator,
    mut rx: mpsc::Receiver<Envelope>,
    policy: QueuePolicy,
) {
    info!(?policy, "attendance: coordinator started");
    let mut pending = std::collections::VecDeque::new();
    let mut picker_stale = false;
    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(envelope) => pending.push_back(envelope),
                None => break,
            }
        }
        if policy == QueuePolicy::Coalesce {
            while let Ok(envelope) = rx.try_recv() {
                pending.push_back(envelope);
            }
            picker_stale |= coalesce(&mut pending, &coordinator);
        }
        if let Some(envelope) = pending.pop_front() {
            let trigger = envelope.command.trigger_origin().is_some();
            let reply = process(&mut coordinator, &envelope.command).await;
            if trigger && picker_stale {
                coordinator.reconcile_selection();
                picker_stale = false;
            }
            envelope.respond(reply);
        }
    }
    info!("attendance: coordinator stopped");
}

/// Keeps every non-trigger command and only the newest trigger, in queue order.
/// Returns whether a dropped trigger was a picker selection.
fn coalesce(
    pending: &mut std::collections::VecDeque<Envelope>,
    coordinator: &AttendanceCoordinator,
) -> bool {
    let Some(latest) = pending
        .iter()
        .rposition(|envelope| envelope.command.trigger_origin().is_some())
    else {
        return false;
    };
    let mut dropped_selection = false;

    let drained: Vec<Envelope> = pending.drain(..).collect();
    for (index, envelope) in drained.into_iter().enumerate() {
        match envelope.command.trigger_origin() {
            Some(origin) if index != latest => {
                dropped_selection |=
                    matches!(envelope.command, AttendanceCommand::ManualSelect(_));
                debug!(
                    command = envelope.command.command_name(),
                    "attendance: trigger superseded by a newer request"
                );
                let _ = coordinator.event_sender().send(AttendanceEvent::Ignored {
                    origin,
                    reason: IgnoreReason::Superseded,
                });
                envelope.respond(CommandReply::Transition(TransitionOutcome::Ignored {
                    origin,
                    reason: IgnoreReason::Superseded,
                }));
            }
            _ => pending.push_back(envelope),
        }
    }
    dropped_selection
}

async fn process(coordinator: &mut AttendanceCoordinator, command: &AttendanceCommand) -> CommandReply {
    match command {
        AttendanceCommand::InitialFetch(location) => {
            CommandReply::Transition(coordinator.on_initial_fetch(location.clone()))
        }
        AttendanceCommand::Sync(user_id) => match coordinator.sync_from_backend(*user_id).await {
            Ok(outcome) => CommandReply::Transition(outcome),
            Err(err) => CommandReply::Failed(ApiError::from(&err)),
        },
        AttendanceCommand::RefreshDirectory => match coordinator.refresh_directory().await {
            Ok(count) => CommandReply::DirectoryLoaded(count),
            Err(err) => CommandReply::Failed(ApiError::from(&err)),
        },
        AttendanceCommand::ManualSelect(selection) => {
            CommandReply::Transition(coordinator.on_manual_select(selection.clone()).await)
        }
        AttendanceCommand::Detect(candidate) => {
            CommandReply::Transition(coordinator.on_detect(*candidate).await)
        }
        AttendanceCommand::DetectPayload(payload) => {
            CommandReply::Transition(coordinator.on_detect_payload(payload).await)
        }
        AttendanceCommand::Checkout => {
            CommandReply::Transition(coordinator.request_checkout().await)
        }
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
