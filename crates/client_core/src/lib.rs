//! Attendance reconciliation core: the session façade, the location
//! directory, and the coordinator that turns initial fetches, picker changes
//! and QR detections into an ordered sequence of clock-in/clock-out calls.

pub mod coordinator;
pub mod error;
pub mod location_directory;
pub mod runtime;
pub mod selection;
pub mod session_service;
pub mod settings;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{
    plan_transition, AttendanceCoordinator, AttendanceEvent, AttendanceState, IgnoreReason,
    OpOutcome, SessionOp, Target, TransitionOutcome, TransitionRequest,
};
pub use error::SessionError;
pub use location_directory::LocationDirectory;
pub use runtime::{
    spawn, AttendanceCommand, CommandReply, CoordinatorHandle, DispatchError, QueuePolicy,
};
pub use selection::{ChangeOrigin, EchoGate, Selection, SelectionChange, SelectionStore};
pub use session_service::{
    LocationSource, MissingTokenProvider, SessionOps, SessionService, StaticTokenProvider,
    TokenProvider,
};
pub use settings::{load_settings, Settings, SettingsError};
pub use workers::WorkersRoster;
