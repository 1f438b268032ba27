//! Error types for GPU operations.

use thiserror::Error;

/// Errors that can occur during GPU operations.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found")]
    NoAdapter,

    /// GPU context was already initialized.
    #[error("GPU context already initialized")]
    AlreadyInitialized,

    /// Failed to request GPU device.
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Buffer mapping failed.
    #[error("Buffer mapping failed")]
    BufferMapping,

    /// GPU context not initialized.
    #[error("GPU context not initialized - submit an init task first")]
    NotInitialized,

    /// A compute program failed to compile or link.
    #[error("Program compilation failed: {0}")]
    Compile(String),

    /// The device rejected a dispatch.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// The worker thread could not be started.
    #[error("Failed to spawn GPU worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread is gone; the channel was shut down.
    #[error("GPU channel closed")]
    ChannelClosed,

    /// The worker thread panicked.
    #[error("GPU worker panicked")]
    WorkerPanicked,
}

/// Result type for GPU operations.
pub type Result<T> = std::result::Result<T, GpuError>;
