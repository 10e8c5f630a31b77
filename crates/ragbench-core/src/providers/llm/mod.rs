pub mod fake;
pub mod openai;

use crate::config::BackendConfig;
use crate::errors::RunError;
use crate::model::{Generation, RequestDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// One backend connection. The worker pool gives each worker its own
/// instance, so implementations never see concurrent calls from the pool.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Generation, RunError>;
    fn provider_name(&self) -> &'static str;
}

/// Role a client plays, which decides the request shape it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Plain generation against the system under test.
    Generate,
    /// JSON-mode scoring calls made by the accuracy judge.
    Judge,
}

/// Build `n` independent clients for a worker pool.
pub fn construct_clients(
    backend: &BackendConfig,
    role: ClientRole,
    n: usize,
) -> Result<Vec<Arc<dyn LlmClient>>, RunError> {
    let mut clients: Vec<Arc<dyn LlmClient>> = Vec::with_capacity(n);
    for _ in 0..n {
        let client: Arc<dyn LlmClient> = match backend.provider.as_str() {
            "openai" => Arc::new(openai::OpenAIClient::from_config(backend, role)?),
            "fake" => Arc::new(match role {
                ClientRole::Generate => fake::FakeClient::echo(),
                ClientRole::Judge => fake::FakeClient::judge_fixed(1.0, "fake judge verdict"),
            }),
            other => {
                return Err(RunError::invalid_args(format!(
                    "unknown backend provider '{}'",
                    other
                )))
            }
        };
        clients.push(client);
    }
    Ok(clients)
}
