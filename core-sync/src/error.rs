use bridge_traits::error::BridgeError;
use core_device::DeviceError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Track '{title}' is already on device")]
    DuplicateTrack { title: String },

    #[error("Format {0} is not supported by the device")]
    UnsupportedFormat(String),

    #[error("Not enough space on device: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Track '{0}' has no local file to transfer")]
    MissingSource(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid transfer status: {0}")]
    InvalidStatus(String),

    #[error("Invalid transfer kind: {0}")]
    InvalidTransferKind(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        SyncError::Staging(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
