//! Capture Orchestrator: when to snapshot the active page, and what happens
//! to the snapshot afterwards.

mod orchestrator;
mod policy;
mod scheduler;
mod surface;

pub use orchestrator::{CaptureError, CaptureEvent, CaptureOrchestrator, CaptureOutcome, SkipReason};
pub use policy::CapturePolicy;
pub use scheduler::{run_scheduler, ScheduleOptions, Trigger};
pub use surface::{PageInfo, PushedPage, PushedSurface, Surface, SurfaceFuture};
