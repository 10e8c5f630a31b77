//! Benchmark request orchestration and answer-accuracy judging for RAG
//! serving backends.
//!
//! A [`engine::BenchmarkDriver`] pushes a dataset through a fixed
//! [`engine::WorkerPool`] in barrier-drained cohorts; an
//! [`judge::AccuracyJudge`] scores the resulting answers with a score cache,
//! a short rule table and, as a last resort, an LLM judge.

pub mod config;
pub mod dataset;
pub mod energy;
pub mod engine;
pub mod errors;
pub mod judge;
pub mod model;
pub mod providers;
pub mod report;

pub use config::{load_config, BackendConfig, BenchConfig, JudgeConfig};
pub use errors::{BenchError, RunError, RunErrorKind};
pub use model::{CompletedRequest, RequestDescriptor, Ticket};
