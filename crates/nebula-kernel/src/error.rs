//! Error types for scene operations.

use nebula_raytrace::AccelError;
use thiserror::Error;

use crate::SceneHandle;

/// Errors that can occur during scene operations.
#[derive(Error, Debug)]
pub enum SceneError {
    /// The handle does not name a live scene.
    #[error("scene not found: {0:?}")]
    NotFound(SceneHandle),

    /// The accelerator backend failed to create a device.
    #[error(transparent)]
    Device(#[from] AccelError),
}

/// Result type for scene operations.
pub type Result<T> = std::result::Result<T, SceneError>;
