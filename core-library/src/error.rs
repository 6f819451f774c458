use core_device::DeviceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
