//! Ambient observability: tracing initialization, a panic hook that logs
//! through `tracing` instead of stderr, and a process-wide metrics registry.
//! Every binary in the workspace calls these the same way the teacher's
//! service binaries do.

pub mod metrics;
pub mod panic_hook;
pub mod tracing_setup;

pub use tracing_setup::initialize;
