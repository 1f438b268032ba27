//! The compute backend capability.

use crate::error::Result;

/// A GPU compute context driven from a single thread.
///
/// Implementations are created and used on the channel's worker thread
/// only, so they need not be `Send`.
///
/// Every program follows one binding convention: group 0, binding 0 is a
/// read-only storage buffer holding the input bytes, and binding 1 is a
/// read-write storage buffer of the requested output size.
pub trait ComputeBackend: 'static {
    /// A compiled, linked compute program.
    type Program;

    /// Compile `source` into a program with a single compute entry point.
    fn compile(&mut self, source: &str) -> Result<Self::Program>;

    /// Run `program` over `groups` workgroups and read back the output buffer.
    ///
    /// Returns at least `output_size` bytes; the caller truncates.
    fn dispatch(
        &mut self,
        program: &Self::Program,
        input: &[u8],
        output_size: usize,
        groups: [u32; 3],
    ) -> Result<Vec<u8>>;
}
