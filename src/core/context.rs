use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::kernel::{KernelCapabilities, NumericKernel};

/// Cooperative cancellation flag, checked at refinement iteration
/// boundaries. Cancelling never corrupts a lookup table: the last fully
/// committed table is always the one returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Shared state handed to every processing component: the numeric backend,
/// its capabilities (resolved once, here) and the cancellation token.
///
/// Scratch rasters (resampled images, intermediate interferograms) are
/// locals inside each iteration and drop before the next one begins, so
/// peak memory stays bounded to one scene regardless of iteration count.
pub struct EngineContext<'k> {
    pub kernel: &'k dyn NumericKernel,
    pub capabilities: KernelCapabilities,
    pub cancel: CancelToken,
}

impl<'k> EngineContext<'k> {
    pub fn new(kernel: &'k dyn NumericKernel) -> Self {
        let capabilities = kernel.capabilities();
        Self {
            kernel,
            capabilities,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(kernel: &'k dyn NumericKernel, cancel: CancelToken) -> Self {
        let capabilities = kernel.capabilities();
        Self {
            kernel,
            capabilities,
            cancel,
        }
    }
}
