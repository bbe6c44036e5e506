//! Analytics Event Buffering
//!
//! Application events are queued in a bounded lock-free buffer and shipped
//! to a pluggable [`AnalyticsSink`] in batches, either on demand or from a
//! supervised background flusher.

mod buffer;

pub use buffer::{AnalyticsBuffer, AnalyticsConfig, AnalyticsEvent, AnalyticsSink, MemorySink};
