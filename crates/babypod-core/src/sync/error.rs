use core::fmt;

use crate::{
    clock::ClockError,
    mode::{ModeError, ModeState},
    remote::{ApiError, ConnectivityError},
    storage::StorageError,
};

/// Failure surfaced to the flow layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncError {
    Connectivity(ConnectivityError),
    Api(ApiError),
    Storage(StorageError),
    Clock(ClockError),
    /// The operation is not accepted in the current mode.
    NotReady(ModeState),
    Mode(ModeError),
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(err) => Self::Connectivity(err),
            other => Self::Api(other),
        }
    }
}

impl From<ConnectivityError> for SyncError {
    fn from(err: ConnectivityError) -> Self {
        Self::Connectivity(err)
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<ClockError> for SyncError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::Storage(err) => Self::Storage(err),
            other => Self::Clock(other),
        }
    }
}

impl From<ModeError> for SyncError {
    fn from(err: ModeError) -> Self {
        Self::Mode(err)
    }
}

/// Hardware needed for offline support that failed to come up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HardwareInitError {
    RtcMissing,
    StorageMissing,
    Storage(StorageError),
}

// Short enough for a 20-column status line.
impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity(ConnectivityError::Unreachable) => f.write_str("Can't connect"),
            Self::Connectivity(ConnectivityError::Timeout) => f.write_str("Timed out"),
            Self::Api(ApiError::AuthFailed) => f.write_str("Bad API token"),
            Self::Api(ApiError::Validation { status }) => write!(f, "Rejected ({})", status),
            Self::Api(ApiError::ServerError { status }) => write!(f, "Server error ({})", status),
            Self::Api(ApiError::Network(_)) => f.write_str("Network error"),
            Self::Storage(StorageError::Full) => f.write_str("SD card full"),
            Self::Storage(StorageError::Unwritable) => f.write_str("SD card error"),
            Self::Storage(StorageError::Corrupt) => f.write_str("Queue corrupt"),
            Self::Storage(StorageError::TooLarge) => f.write_str("Entry too large"),
            Self::Clock(ClockError::UnsyncedWhileOffline | ClockError::NeverSynced) => {
                f.write_str("Clock not set")
            }
            Self::Clock(ClockError::Fetch(_)) => f.write_str("Clock sync failed"),
            Self::Clock(_) => f.write_str("Clock error"),
            Self::NotReady(ModeState::Replaying) => f.write_str("Still syncing"),
            Self::NotReady(_) => f.write_str("Not available"),
            Self::Mode(_) => f.write_str("Not allowed now"),
        }
    }
}
