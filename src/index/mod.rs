//! Progressive Window Index
//!
//! Daily basket-vs-reference snapshots and the best-window outperformance
//! index computed from them.
//!
//! ```text
//!  day 0 ........................ day N (today)
//!  |<------- span = today - earliest ------->|
//!        |<---- window = min(span, max) ---->|
//!        baseline                       current
//! ```

mod progressive;
mod snapshot;

pub use progressive::{ProgressiveWindowIndex, WindowIndex, WindowIndexConfig};
pub use snapshot::{BasketPrice, IndicatorSnapshot, SnapshotFile, SnapshotStore};
