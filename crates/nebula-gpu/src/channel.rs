//! The GPU command channel: one worker thread owns the backend and its
//! programs, callers submit tasks and block on the reply.
//!
//! Submission holds a mutex across send and receive, so at most one task is
//! in flight no matter how many threads submit.

use std::marker::PhantomData;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::ComputeBackend;
use crate::config::GpuConfig;
use crate::error::{GpuError, Result};
use crate::programs::{ProgramId, ProgramSlot, ProgramTable};
use crate::wgpu_backend::WgpuBackend;

type Reply<T> = Sender<Result<T>>;

/// Output buffer size and workgroup counts of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchShape {
    /// Bytes to read back.
    pub output_size: usize,
    /// Workgroups along x, y and z.
    pub groups: [u32; 3],
}

impl DispatchShape {
    /// Shape reading back `output_size` bytes after `groups` workgroups.
    pub fn new(output_size: usize, groups: [u32; 3]) -> Self {
        Self {
            output_size,
            groups,
        }
    }
}

/// Tasks sent from callers to the worker.
enum Task {
    Init {
        reply: Reply<()>,
    },
    Compile {
        source: String,
        reply: Reply<ProgramId>,
    },
    Remove {
        program: ProgramId,
        reply: Reply<bool>,
    },
    SetCurrent {
        program: ProgramId,
        reply: Reply<bool>,
    },
    Dispatch {
        program: Option<ProgramId>,
        input: Vec<u8>,
        shape: DispatchShape,
        reply: Reply<Vec<u8>>,
    },
    RunSource {
        source: String,
        input: Vec<u8>,
        shape: DispatchShape,
        reply: Reply<Vec<u8>>,
    },
    Shutdown,
}

/// Handle to the GPU worker thread.
///
/// All methods block until the worker has answered. Dropping the channel
/// shuts the worker down and joins it.
pub struct GpuChannel<B: ComputeBackend> {
    tx: Mutex<Sender<Task>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    _backend: PhantomData<fn() -> B>,
}

impl GpuChannel<WgpuBackend> {
    /// Spawn a worker whose init task creates a wgpu context from `config`.
    pub fn with_config(config: GpuConfig) -> Result<Self> {
        Self::spawn(move || WgpuBackend::new_blocking(&config))
    }
}

impl<B: ComputeBackend> GpuChannel<B> {
    /// Spawn the worker thread.
    ///
    /// `factory` runs on the worker when an init task arrives; a failed
    /// init may be retried.
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnMut() -> Result<B> + Send + 'static,
    {
        let (tx, rx) = channel::<Task>();

        let handle = thread::Builder::new()
            .name("nebula-gpu".into())
            .spawn(move || {
                Worker::new(factory).run(rx);
            })?;
        info!("GPU worker spawned");

        Ok(Self {
            tx: Mutex::new(tx),
            handle: Mutex::new(Some(handle)),
            _backend: PhantomData,
        })
    }

    fn submit<T>(&self, task: impl FnOnce(Reply<T>) -> Task) -> Result<T> {
        let tx = self.tx.lock();
        let (reply_tx, reply_rx) = channel();
        tx.send(task(reply_tx))
            .map_err(|_| GpuError::ChannelClosed)?;
        reply_rx.recv().map_err(|_| GpuError::ChannelClosed)?
    }

    /// Create the GPU context. Must precede every other task.
    pub fn init(&self) -> Result<()> {
        self.submit(|reply| Task::Init { reply })
    }

    /// Compile a program and add it to the table.
    ///
    /// A program that fails to compile is logged and still gets an id;
    /// dispatching it yields zero-filled output.
    pub fn compile(&self, source: &str) -> Result<ProgramId> {
        let source = source.to_owned();
        self.submit(|reply| Task::Compile { source, reply })
    }

    /// Remove a program. Returns false if the id was unknown.
    pub fn remove(&self, program: ProgramId) -> Result<bool> {
        self.submit(|reply| Task::Remove { program, reply })
    }

    /// Select the program used by [`dispatch_current`](Self::dispatch_current).
    /// Returns false if the id was unknown.
    pub fn set_current(&self, program: ProgramId) -> Result<bool> {
        self.submit(|reply| Task::SetCurrent { program, reply })
    }

    /// Run a program and return exactly `shape.output_size` bytes.
    pub fn dispatch(&self, program: ProgramId, input: &[u8], shape: DispatchShape) -> Result<Vec<u8>> {
        let input = input.to_vec();
        self.submit(|reply| Task::Dispatch {
            program: Some(program),
            input,
            shape,
            reply,
        })
    }

    /// Run the current program and return exactly `shape.output_size` bytes.
    pub fn dispatch_current(&self, input: &[u8], shape: DispatchShape) -> Result<Vec<u8>> {
        let input = input.to_vec();
        self.submit(|reply| Task::Dispatch {
            program: None,
            input,
            shape,
            reply,
        })
    }

    /// Compile `source`, run it once and discard it.
    pub fn run_source(&self, source: &str, input: &[u8], shape: DispatchShape) -> Result<Vec<u8>> {
        let source = source.to_owned();
        let input = input.to_vec();
        self.submit(|reply| Task::RunSource {
            source,
            input,
            shape,
            reply,
        })
    }

    /// Release all programs and the context, then join the worker.
    ///
    /// Later tasks fail with [`GpuError::ChannelClosed`]. Calling this twice
    /// is harmless.
    pub fn shutdown(&self) -> Result<()> {
        let tx = self.tx.lock();
        let _ = tx.send(Task::Shutdown);
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| GpuError::WorkerPanicked),
            None => Ok(()),
        }
    }

    /// True until [`shutdown`](Self::shutdown) has run.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl<B: ComputeBackend> Drop for GpuChannel<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(%err, "GPU worker did not shut down cleanly");
        }
    }
}

/// State confined to the worker thread.
struct Worker<B: ComputeBackend> {
    factory: Box<dyn FnMut() -> Result<B> + Send>,
    backend: Option<B>,
    programs: ProgramTable<B::Program>,
}

impl<B: ComputeBackend> Worker<B> {
    fn new(factory: impl FnMut() -> Result<B> + Send + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            backend: None,
            programs: ProgramTable::new(),
        }
    }

    /// Main worker loop: answer tasks until shutdown or the channel closes.
    fn run(mut self, rx: Receiver<Task>) {
        while let Ok(task) = rx.recv() {
            // A dropped reply receiver only means the caller went away.
            match task {
                Task::Init { reply } => {
                    let _ = reply.send(self.init());
                }
                Task::Compile { source, reply } => {
                    let _ = reply.send(self.compile(&source));
                }
                Task::Remove { program, reply } => {
                    let removed = self.programs.remove(program);
                    if !removed {
                        debug!(program = program.to_raw(), "remove: unknown program");
                    }
                    let _ = reply.send(Ok(removed));
                }
                Task::SetCurrent { program, reply } => {
                    let selected = self.programs.set_current(program);
                    if !selected {
                        debug!(program = program.to_raw(), "set current: unknown program");
                    }
                    let _ = reply.send(Ok(selected));
                }
                Task::Dispatch {
                    program,
                    input,
                    shape,
                    reply,
                } => {
                    let _ = reply.send(self.dispatch(program, &input, shape));
                }
                Task::RunSource {
                    source,
                    input,
                    shape,
                    reply,
                } => {
                    let _ = reply.send(self.run_source(&source, &input, shape));
                }
                Task::Shutdown => break,
            }
        }

        let programs = self.programs.len();
        self.programs.clear();
        self.backend = None;
        info!(programs, "GPU worker stopped");
    }

    fn init(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Err(GpuError::AlreadyInitialized);
        }
        let backend = (self.factory)()?;
        self.backend = Some(backend);
        info!("GPU context initialized");
        Ok(())
    }

    fn compile(&mut self, source: &str) -> Result<ProgramId> {
        let backend = self.backend.as_mut().ok_or(GpuError::NotInitialized)?;
        let slot = match backend.compile(source) {
            Ok(program) => ProgramSlot::Ready(program),
            Err(err) => {
                error!(%err, "compute program failed to compile");
                ProgramSlot::Broken
            }
        };
        let id = self.programs.insert(slot);
        debug!(program = id.to_raw(), "program compiled");
        Ok(id)
    }

    fn dispatch(&mut self, program: Option<ProgramId>, input: &[u8], shape: DispatchShape) -> Result<Vec<u8>> {
        let backend = self.backend.as_mut().ok_or(GpuError::NotInitialized)?;
        let zeroed = vec![0u8; shape.output_size];

        let Some(id) = program.or(self.programs.current()) else {
            warn!("dispatch with no current program");
            return Ok(zeroed);
        };

        match self.programs.get(id) {
            Some(ProgramSlot::Ready(program)) => Ok(run_program(backend, program, input, shape)),
            Some(ProgramSlot::Broken) => {
                warn!(program = id.to_raw(), "dispatch on a program that failed to compile");
                Ok(zeroed)
            }
            None => {
                debug!(program = id.to_raw(), "dispatch: unknown program");
                Ok(zeroed)
            }
        }
    }

    fn run_source(&mut self, source: &str, input: &[u8], shape: DispatchShape) -> Result<Vec<u8>> {
        let backend = self.backend.as_mut().ok_or(GpuError::NotInitialized)?;
        match backend.compile(source) {
            Ok(program) => Ok(run_program(backend, &program, input, shape)),
            Err(err) => {
                error!(%err, "compute program failed to compile");
                Ok(vec![0u8; shape.output_size])
            }
        }
    }
}

/// Dispatch and size the result to exactly `shape.output_size` bytes.
///
/// Backend failures are logged and read as zero-filled output.
fn run_program<B: ComputeBackend>(
    backend: &mut B,
    program: &B::Program,
    input: &[u8],
    shape: DispatchShape,
) -> Vec<u8> {
    match backend.dispatch(program, input, shape.output_size, shape.groups) {
        Ok(mut output) => {
            output.resize(shape.output_size, 0);
            debug!(input = input.len(), output = output.len(), "dispatch complete");
            output
        }
        Err(err) => {
            error!(%err, "dispatch failed");
            vec![0u8; shape.output_size]
        }
    }
}
