pub mod progress;
pub mod sink;
pub mod summary;

pub use progress::{ProgressEvent, ProgressSink};
pub use sink::{JsonDirSink, ResultSink};
pub use summary::{RunInfo, RunTally, SummaryFile, SummaryMetrics};
