//! Errors raised while building, querying and tearing down bus objects.

use crate::hardware::{EntityKind, HardwareError};
use crate::path::PathError;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Path encoding failed: {0}")]
    PathEncoding(#[from] PathError),

    #[error("Invalid hardware handle: {0}")]
    HandleInvalid(#[from] HardwareError),

    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Object has been torn down")]
    Gone,

    #[error("{property} is not available on {kind} objects")]
    Unsupported {
        property: &'static str,
        kind: EntityKind,
    },

    #[error("Object path already in use: {0}")]
    DuplicatePath(String),

    #[error("Bus registration failed: {0}")]
    Registration(String),
}

impl CoreError {
    /// errno-style cause code reported alongside bus errors.
    pub fn errno(&self) -> Errno {
        match self {
            CoreError::PathEncoding(_) => Errno::EINVAL,
            CoreError::HandleInvalid(_) => Errno::ENODEV,
            CoreError::NotFound(_) | CoreError::Gone => Errno::ENOENT,
            CoreError::Unsupported { .. } => Errno::ENOTSUP,
            CoreError::DuplicatePath(_) => Errno::EEXIST,
            CoreError::Registration(_) => Errno::EIO,
        }
    }
}

impl From<CoreError> for zbus::fdo::Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) | CoreError::Gone => {
                zbus::fdo::Error::UnknownObject(err.to_string())
            }
            other => zbus::fdo::Error::Failed(format!(
                "{} (errno {})",
                other,
                other.errno() as i32
            )),
        }
    }
}
