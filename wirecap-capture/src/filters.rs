//! BPF (Berkeley Packet Filter) compilation and installation

use tracing::debug;
use wirecap_core::Result;

use crate::engine::Session;
use crate::handle::CaptureHandle;

/// Netmask passed to the compiler when the caller has none
pub const DEFAULT_NETMASK: u32 = 0;

/// Compiles filter expressions, with optimization, and installs them on a capture handle.
///
/// The compiled program only lives for the duration of one call: it is freed right after
/// installation, whether or not installation succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterCompiler;

impl FilterCompiler {
    pub fn new() -> Self {
        FilterCompiler
    }

    /// Compile `expression` and install it on `handle`.
    ///
    /// An empty expression clears the filter. On failure the previously installed filter
    /// stays in place and the error carries the engine's message.
    pub fn compile_and_install<S: Session>(
        &self,
        handle: &CaptureHandle<S>,
        expression: &str,
        netmask: u32,
    ) -> Result<()> {
        if expression.is_empty() {
            return self.clear(handle);
        }

        handle.with_session(|session| {
            let program = session.compile(expression, true, netmask)?;
            let installed = session.set_filter(&program);
            session.free_program(program);
            installed
        })?;

        debug!(source = handle.source(), filter = expression, "Installed filter");
        Ok(())
    }

    /// Install a filter that accepts every packet
    pub fn clear<S: Session>(&self, handle: &CaptureHandle<S>) -> Result<()> {
        handle.with_session(|session| session.clear_filter())?;
        debug!(source = handle.source(), "Cleared filter");
        Ok(())
    }
}

/// Combine multiple filters with AND logic; empty filters are skipped
pub fn combine_filters<F: AsRef<str>>(filters: &[F]) -> String {
    filters
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| !f.is_empty())
        .map(|f| format!("({})", f))
        .collect::<Vec<_>>()
        .join(" and ")
}
