//! Error types for the playback engine.
//!
//! Synchronous API calls return [`EngineError`]; failures that happen on the
//! driver callback path are surfaced through the event channel instead (see
//! [`crate::status::EngineEvent`]) because there is no caller to return to.

use thiserror::Error;

use crate::engine::SessionState;

/// Errors returned by the engine's public operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad or unsupported format, or a derived buffer size of zero.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A driver call reported a non-success status.
    #[error("hardware error: {0}")]
    Hardware(#[from] DriverError),

    /// Operation invoked outside its legal session state.
    #[error("invalid state: {op} is not legal while {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// No free buffer was available for a synchronous operation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
}

/// Raw status reported by an output-queue driver plus its category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (status {status})")]
pub struct DriverError {
    /// Raw status code as reported by the driver.
    pub status: i32,
    pub kind: DriverErrorKind,
}

/// Categories for the status codes audio-queue style drivers report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    InvalidBuffer,
    BufferEmpty,
    DisposalPending,
    InvalidProperty,
    InvalidParameter,
    CannotStart,
    InvalidDevice,
    BufferInQueue,
    InvalidRunState,
    Permissions,
    QueueInvalidated,
    EnqueueDuringReset,
    UnsupportedFormat,
    Unknown,
}

/// Well-known status codes and their categories.
const KNOWN_STATUS: &[(i32, DriverErrorKind)] = &[
    (-66687, DriverErrorKind::InvalidBuffer),
    (-66686, DriverErrorKind::BufferEmpty),
    (-66685, DriverErrorKind::DisposalPending),
    (-66684, DriverErrorKind::InvalidProperty),
    (-66682, DriverErrorKind::InvalidParameter),
    (-66681, DriverErrorKind::CannotStart),
    (-66680, DriverErrorKind::InvalidDevice),
    (-66679, DriverErrorKind::BufferInQueue),
    (-66678, DriverErrorKind::InvalidRunState),
    (-66676, DriverErrorKind::Permissions),
    (-66671, DriverErrorKind::QueueInvalidated),
    (-66632, DriverErrorKind::EnqueueDuringReset),
    (0x666d_743f, DriverErrorKind::UnsupportedFormat), // 'fmt?'
];

impl DriverError {
    /// Classify a raw driver status code.
    pub fn from_status(status: i32) -> Self {
        let kind = KNOWN_STATUS
            .iter()
            .find(|(code, _)| *code == status)
            .map(|(_, kind)| *kind)
            .unwrap_or(DriverErrorKind::Unknown);
        Self { status, kind }
    }

    /// Build an error from a category, using its canonical status code.
    ///
    /// For drivers (such as the portable cpal one) that have no raw status
    /// space of their own.
    pub fn from_kind(kind: DriverErrorKind) -> Self {
        let status = KNOWN_STATUS
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(code, _)| *code)
            .unwrap_or(0);
        Self { status, kind }
    }
}

impl DriverErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidBuffer => "buffer does not belong to this queue",
            Self::BufferEmpty => "buffer is empty",
            Self::DisposalPending => "queue is being asynchronously disposed",
            Self::InvalidProperty => "invalid property id",
            Self::InvalidParameter => "invalid parameter",
            Self::CannotStart => "queue cannot start",
            Self::InvalidDevice => "audio hardware device could not be located",
            Self::BufferInQueue => "buffer cannot be disposed while enqueued",
            Self::InvalidRunState => "operation not legal in the queue's run state",
            Self::Permissions => "missing permissions for this operation",
            Self::QueueInvalidated => "audio server exited; queue is invalid",
            Self::EnqueueDuringReset => "cannot enqueue while the queue is resetting",
            Self::UnsupportedFormat => "playback data format is unsupported",
            Self::Unknown => "unknown driver status",
        }
    }
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_maps_to_category() {
        let err = DriverError::from_status(-66681);
        assert_eq!(err.kind, DriverErrorKind::CannotStart);
        assert_eq!(err.status, -66681);
    }

    #[test]
    fn unknown_status_keeps_raw_code() {
        let err = DriverError::from_status(42);
        assert_eq!(err.kind, DriverErrorKind::Unknown);
        assert_eq!(err.status, 42);
    }

    #[test]
    fn from_kind_round_trips_canonical_status() {
        let err = DriverError::from_kind(DriverErrorKind::InvalidDevice);
        assert_eq!(DriverError::from_status(err.status).kind, err.kind);
    }

    #[test]
    fn display_carries_category_and_status() {
        let err = DriverError::from_status(-66678);
        let text = err.to_string();
        assert!(text.contains("run state"));
        assert!(text.contains("-66678"));
    }
}
