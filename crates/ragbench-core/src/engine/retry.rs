use crate::config::BackendConfig;
use crate::errors::RunError;
use crate::model::{Generation, RequestDescriptor};
use crate::providers::llm::LlmClient;
use std::time::Duration;
use tokio::time::timeout;

const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Bounded retry of transient client failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Upper bound on a single attempt; expiry counts as a transient timeout.
    pub attempt_timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(60),
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_backend(backend: &BackendConfig) -> Self {
        Self {
            max_attempts: backend.max_attempts.max(1),
            attempt_timeout: backend.request_timeout(),
            backoff: Duration::from_millis(backend.retry_backoff_ms),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Outcome of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<Generation, RunError>,
    pub attempts: u32,
}

pub async fn execute_with_retry(
    client: &dyn LlmClient,
    request: &RequestDescriptor,
    policy: &RetryPolicy,
) -> Attempted {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match timeout(policy.attempt_timeout, client.execute(request)).await {
            Ok(res) => res,
            Err(_) => Err(RunError::provider_timeout(
                Some(client.provider_name().to_string()),
                format!("no response within {:?}", policy.attempt_timeout),
            )),
        };

        match result {
            Ok(generation) => {
                return Attempted {
                    result: Ok(generation),
                    attempts: attempt,
                }
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    kind = err.kind.as_str(),
                    "call failed on attempt {}, retrying: {}",
                    attempt,
                    err
                );
                tokio::time::sleep(policy.backoff_for(attempt)).await;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(
                        attempts = attempt,
                        kind = err.kind.as_str(),
                        "giving up after {} attempts: {}",
                        attempt,
                        err
                    );
                } else {
                    tracing::error!(kind = err.kind.as_str(), "unexpected error: {}", err);
                }
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RunErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedClient {
        script: Mutex<Vec<Result<Generation, RunError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<Generation, RunError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn execute(&self, _request: &RequestDescriptor) -> Result<Generation, RunError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(RunError::network(None, "connection reset"));
            }
            script.remove(0)
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }

    struct HangingClient;

    #[async_trait]
    impl LlmClient for HangingClient {
        async fn execute(&self, _request: &RequestDescriptor) -> Result<Generation, RunError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Generation::text("never"))
        }

        fn provider_name(&self) -> &'static str {
            "hanging"
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
        }
    }

    fn req() -> RequestDescriptor {
        RequestDescriptor::new("m", "q", "RAG")
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let client = ScriptedClient::new(vec![
            Err(RunError::network(None, "refused")),
            Err(RunError::provider_rate_limit(429, None, "slow down")),
            Ok(Generation::text("done")),
        ]);
        let out = execute_with_retry(&client, &req(), &fast_policy(10)).await;
        assert_eq!(out.result.unwrap().text, "done");
        assert_eq!(out.attempts, 3);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let client = ScriptedClient::new(vec![
            Err(RunError::auth(401, None, "bad key")),
            Ok(Generation::text("unreachable")),
        ]);
        let out = execute_with_retry(&client, &req(), &fast_policy(10)).await;
        assert_eq!(out.result.unwrap_err().kind, RunErrorKind::Auth);
        assert_eq!(out.attempts, 1);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_the_bound() {
        let client = ScriptedClient::new(vec![]);
        let out = execute_with_retry(&client, &req(), &fast_policy(10)).await;
        assert_eq!(out.result.unwrap_err().kind, RunErrorKind::Network);
        assert_eq!(out.attempts, 10);
        assert_eq!(client.calls(), 10);
    }

    #[tokio::test]
    async fn hung_attempt_is_cut_off_as_timeout() {
        let out = execute_with_retry(&HangingClient, &req(), &fast_policy(2)).await;
        assert_eq!(out.result.unwrap_err().kind, RunErrorKind::ProviderTimeout);
        assert_eq!(out.attempts, 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(250),
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(10), MAX_BACKOFF);
    }
}
