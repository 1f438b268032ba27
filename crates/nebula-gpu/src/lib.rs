//! Thread-confined GPU compute for nebula.
//!
//! A GPU context may only be driven from the thread that created it. The
//! [`GpuChannel`] owns one worker thread which creates the context, keeps
//! the table of compiled programs and runs every dispatch; any thread may
//! submit tasks and block on the answer.
//!
//! - [`ComputeBackend`] - the compute capability, with [`WgpuBackend`]
//!   running WGSL programs through wgpu
//! - [`GpuChannel`] - task submission to the worker thread
//! - [`GpuConfig`] - adapter selection

#![warn(missing_docs)]

mod backend;
mod channel;
mod config;
mod error;
mod programs;
mod wgpu_backend;

pub use backend::ComputeBackend;
pub use channel::{DispatchShape, GpuChannel};
pub use config::{BackendSelection, GpuConfig, PowerPreference};
pub use error::{GpuError, Result};
pub use programs::ProgramId;
pub use wgpu_backend::{WgpuBackend, WgpuProgram};
