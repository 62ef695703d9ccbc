//! The plugin bus: the calling contract between the dispatcher and
//! externally supplied request plugins.
//!
//! A [`RequestPlugin`] can contribute two things:
//!
//! - a **preprocessing step**, run once per request before the target
//!   method. A step may finish synchronously, write directly into the
//!   request scratch space (e.g. injecting an authenticated identity),
//!   return a pending coroutine the dispatcher joins before proceeding, or
//!   short-circuit the request with an immediate response.
//! - a **named sub-handler**: a handler tree served under
//!   `/_p/<plugin-name>/...`, compiled into its own route table when the
//!   dispatcher is built.
//!
//! The bus itself is dumb by design: it holds the registration order and
//! collects results; chaining, fan-in and error handling live in the
//! dispatcher.

use std::sync::Arc;

use may::coroutine::JoinHandle;
use serde_json::Value;
use tracing::error;

use crate::context::RequestContext;
use crate::dispatcher::{HandlerError, HandlerResponse};
use crate::handler::HandlerType;

/// Scratch entries produced by a pending preprocessor computation,
/// applied by the dispatcher once the computation is joined.
pub type ScratchWrites = Vec<(String, Value)>;

/// Outcome of one preprocessing step.
pub enum PreprocessorResult {
    /// Step finished; continue with the next one.
    Continue,
    /// Step started a coroutine the dispatcher must join before invoking
    /// the target method. The computation returns scratch writes to apply.
    Pending(JoinHandle<Result<ScratchWrites, HandlerError>>),
    /// Stop the chain and answer the request with this response.
    ShortCircuit(HandlerResponse),
}

/// A plugin participating in request handling.
pub trait RequestPlugin: Send + Sync {
    /// Name used for the `/_p/<name>/...` path reservation.
    fn name(&self) -> &str;

    /// Preprocessing step, run before the target method in registration
    /// order. Default: no-op.
    fn pre_process(&self, _ctx: &mut RequestContext) -> PreprocessorResult {
        PreprocessorResult::Continue
    }

    /// Handler tree served under `/_p/<name>/...`, if any.
    fn sub_handler(&self) -> Option<Arc<HandlerType>> {
        None
    }
}

/// Ordered registry of request plugins.
#[derive(Default)]
pub struct PluginBus {
    plugins: Vec<Arc<dyn RequestPlugin>>,
}

impl PluginBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Register a plugin. Registration order is the preprocessing order.
    pub fn register(&mut self, plugin: Arc<dyn RequestPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RequestPlugin>> {
        self.plugins.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin's preprocessing step in registration order and
    /// collect the results. The dispatcher calls this exactly once per
    /// request.
    pub fn pre_process(&self, ctx: &mut RequestContext) -> Vec<PreprocessorResult> {
        self.plugins
            .iter()
            .map(|plugin| plugin.pre_process(ctx))
            .collect()
    }

    /// Look up a plugin's sub-handler by name.
    #[must_use]
    pub fn sub_handler(&self, name: &str) -> Option<Arc<HandlerType>> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .and_then(|p| p.sub_handler())
    }
}

/// Spawn a pending preprocessor computation on a coroutine.
///
/// The returned [`PreprocessorResult::Pending`] hands the join handle to
/// the dispatcher, which joins all pending computations in registration
/// order before the target method runs. If the coroutine cannot be
/// spawned, the request is short-circuited with a 500.
#[allow(unsafe_code)]
pub fn spawn_pending<F>(work: F) -> PreprocessorResult
where
    F: FnOnce() -> Result<ScratchWrites, HandlerError> + Send + 'static,
{
    let stack_size = std::env::var("TRELLIS_STACK_SIZE")
        .ok()
        .and_then(|s| {
            if let Some(hex) = s.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        })
        .unwrap_or(0x4000);

    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may
    // runtime. The closure is Send + 'static, owns all its captures, and
    // reports its outcome through the join handle rather than shared state.
    let spawned = unsafe {
        may::coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(work)
    };
    match spawned {
        Ok(handle) => PreprocessorResult::Pending(handle),
        Err(e) => {
            error!(error = %e, "Failed to spawn preprocessor coroutine");
            PreprocessorResult::ShortCircuit(HandlerResponse::error(
                500,
                "failed to start preprocessing",
            ))
        }
    }
}
