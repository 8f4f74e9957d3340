//! Metrics are a capability passed to each component as
//! `Arc<dyn MetricsRecorder>`.

mod recorder;
pub use recorder::*;
