pub mod batch;
pub mod driver;
pub mod launcher;
pub mod pool;
pub mod retry;

pub use batch::{BatchReport, BatchRunner, ClientFactory, JobReport, JobStatus, Phase};
pub use driver::{BenchOutcome, BenchmarkDriver, DriverState};
pub use launcher::{CohortStats, RequestLauncher};
pub use pool::WorkerPool;
pub use retry::RetryPolicy;

/// Wall-clock time as fractional Unix seconds.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
