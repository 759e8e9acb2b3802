//! Observable picker selection and the echo-suppression gate in front of it.
//!
//! The picker is both input and output: the coordinator writes to it after a
//! detection, a checkout or the initial fetch, and the widget reports every
//! change, including the ones it did not originate. [`SelectionStore`] owns the
//! value, tags each publication with its [`ChangeOrigin`], and routes widget
//! notifications through an [`EchoGate`] so a system write is never replayed as
//! user intent, even when several writes land before the widget reports back.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

pub const ABSENT_LABEL: &str = "Absent";

const MAX_PENDING_ECHOES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Selection {
    Absent,
    Location(String),
}

impl Selection {
    /// Parses user-facing picker text. `absent` matches case-insensitively;
    /// anything else is taken as a location name verbatim (trimmed).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(ABSENT_LABEL) {
            Self::Absent
        } else {
            Self::Location(raw.to_string())
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str(ABSENT_LABEL),
            Self::Location(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub value: Selection,
    pub origin: ChangeOrigin,
}

/// Pending system writes whose widget echo has not arrived yet. Each write
/// suppresses at most one matching notification; an echo of an older write
/// also retires the writes queued before it. A notification that matches none
/// of them is user input and clears the queue.
#[derive(Debug, Default)]
pub struct EchoGate {
    expected: VecDeque<Selection>,
}

impl EchoGate {
    pub fn arm(&mut self, value: Selection) {
        if self.expected.len() == MAX_PENDING_ECHOES {
            self.expected.pop_front();
        }
        self.expected.push_back(value);
    }

    /// Forgets pending echoes of `value` only.
    pub fn forget(&mut self, value: &Selection) {
        self.expected.retain(|pending| pending != value);
    }

    pub fn is_armed(&self) -> bool {
        !self.expected.is_empty()
    }

    /// Returns `false` when `observed` is the echo of a pending write.
    pub fn admit(&mut self, observed: &Selection) -> bool {
        match self.expected.iter().position(|pending| pending == observed) {
            Some(index) => {
                self.expected.drain(..=index);
                false
            }
            None => {
                self.expected.clear();
                true
            }
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    current: Selection,
    gate: EchoGate,
}

#[derive(Clone)]
pub struct SelectionStore {
    inner: Arc<Mutex<StoreInner>>,
    changes: Arc<watch::Sender<SelectionChange>>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(SelectionChange {
            value: Selection::Absent,
            origin: ChangeOrigin::System,
        });
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                current: Selection::Absent,
                gate: EchoGate::default(),
            })),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Selection {
        self.lock().current.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionChange> {
        self.changes.subscribe()
    }

    pub fn is_gate_armed(&self) -> bool {
        self.lock().gate.is_armed()
    }

    /// Programmatic write. Arms the gate only when the observable value
    /// actually changes; an unchanged write drops any pending echo of that
    /// value so a stale expectation cannot swallow a later genuine user action.
    pub fn write_system(&self, value: Selection) -> bool {
        let mut inner = self.lock();
        if inner.current == value {
            inner.gate.forget(&value);
            return false;
        }
        inner.gate.arm(value.clone());
        inner.current = value.clone();
        drop(inner);

        debug!(selection = %value, "selection: system write");
        self.changes.send_replace(SelectionChange {
            value,
            origin: ChangeOrigin::System,
        });
        true
    }

    /// Widget change notification. Returns the selection to act on, or `None`
    /// when the notification is the echo of the last system write.
    pub fn observe_change(&self, value: Selection) -> Option<Selection> {
        let mut inner = self.lock();
        if !inner.gate.admit(&value) {
            debug!(selection = %value, "selection: echo suppressed");
            return None;
        }
        inner.current = value.clone();
        drop(inner);

        self.changes.send_replace(SelectionChange {
            value: value.clone(),
            origin: ChangeOrigin::User,
        });
        Some(value)
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
