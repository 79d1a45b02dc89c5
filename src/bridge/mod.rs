//! Worker Bridge: owns the sandbox, forwards requests into it and routes
//! correlated replies back to their callers.

mod envelope;
mod registry;
mod relay;

pub use envelope::{Action, AnalysisComplete, Request, SandboxMessage, WorkHandle};
pub use registry::PendingRegistry;
pub use relay::{BridgeError, EngineFactory, WorkerBridge};
