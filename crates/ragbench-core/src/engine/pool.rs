use super::retry::{execute_with_retry, RetryPolicy};
use super::unix_now;
use crate::errors::{BenchError, RunError};
use crate::model::{CompletedRequest, RequestDescriptor, Ticket};
use crate::providers::llm::LlmClient;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub(crate) struct Job {
    pub(crate) ticket: Ticket,
    pub(crate) descriptor: RequestDescriptor,
}

/// Fixed set of workers, one client each.
///
/// Jobs wait in a single FIFO queue. An idle worker takes the next job, so a
/// client never handles more than one request at a time and no job is
/// bound to a particular client. The pool is not resized after construction.
pub struct WorkerPool {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    completions: mpsc::UnboundedReceiver<CompletedRequest>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one worker per client; must be called inside a tokio runtime.
    pub fn new(clients: Vec<Arc<dyn LlmClient>>, policy: RetryPolicy) -> Result<Self, BenchError> {
        if clients.is_empty() {
            return Err(BenchError::InvalidConcurrency(0));
        }

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx) = mpsc::unbounded_channel::<CompletedRequest>();
        let policy = Arc::new(policy);

        let workers = clients
            .into_iter()
            .enumerate()
            .map(|(slot, client)| {
                tokio::spawn(worker_loop(
                    slot,
                    client,
                    job_rx.clone(),
                    done_tx.clone(),
                    policy.clone(),
                ))
            })
            .collect();

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn dispatch(&self, job: Job) -> Result<(), BenchError> {
        let sender = self
            .jobs
            .as_ref()
            .ok_or(BenchError::PoolClosed { missing: 1 })?;
        sender
            .send(job)
            .map_err(|_| BenchError::PoolClosed { missing: 1 })
    }

    pub(crate) async fn next_completion(&mut self) -> Option<CompletedRequest> {
        self.completions.recv().await
    }

    /// Closes the queue and waits for every worker to exit.
    pub async fn shutdown(mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("worker exited abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop(
    slot: usize,
    client: Arc<dyn LlmClient>,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    done: mpsc::UnboundedSender<CompletedRequest>,
    policy: Arc<RetryPolicy>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(Job { ticket, descriptor }) = job else {
            break;
        };

        let start_time = unix_now();
        let started = Instant::now();

        // Run the call in its own task so a panicking client still yields a
        // completion for this ticket.
        let call = {
            let client = client.clone();
            let policy = policy.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { execute_with_retry(client.as_ref(), &descriptor, &policy).await })
        };
        let joined = call.await;
        let end_time = start_time + started.elapsed().as_secs_f64();

        let mut completed = match joined {
            Ok(attempted) => match attempted.result {
                Ok(generation) => CompletedRequest::success(
                    descriptor,
                    generation,
                    attempted.attempts,
                    start_time,
                    end_time,
                ),
                Err(err) => CompletedRequest::failed(
                    descriptor,
                    err,
                    attempted.attempts,
                    start_time,
                    end_time,
                ),
            },
            Err(join_err) => CompletedRequest::failed(
                descriptor,
                RunError::other(format!("client task failed: {}", join_err)),
                1,
                start_time,
                end_time,
            ),
        };
        completed.ticket = Some(ticket);

        tracing::trace!(slot, ticket = ticket.0, "request completed");
        if done.send(completed).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Generation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many calls are running on this one client.
    struct ExclusiveClient {
        active: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ExclusiveClient {
        async fn execute(&self, request: &RequestDescriptor) -> Result<Generation, RunError> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Generation::text(request.prompt_text()))
        }

        fn provider_name(&self) -> &'static str {
            "exclusive"
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl LlmClient for PanickingClient {
        async fn execute(&self, _request: &RequestDescriptor) -> Result<Generation, RunError> {
            panic!("client bug");
        }

        fn provider_name(&self) -> &'static str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn empty_pool_is_rejected() {
        let err = WorkerPool::new(vec![], RetryPolicy::default()).err().unwrap();
        assert!(matches!(err, BenchError::InvalidConcurrency(0)));
    }

    #[tokio::test]
    async fn no_client_runs_two_requests_at_once() {
        let clients: Vec<Arc<ExclusiveClient>> = (0..3)
            .map(|_| {
                Arc::new(ExclusiveClient {
                    active: AtomicUsize::new(0),
                    overlapped: AtomicUsize::new(0),
                })
            })
            .collect();
        let dyn_clients: Vec<Arc<dyn LlmClient>> = clients
            .iter()
            .map(|c| c.clone() as Arc<dyn LlmClient>)
            .collect();
        let mut pool = WorkerPool::new(dyn_clients, RetryPolicy::default()).unwrap();
        assert_eq!(pool.size(), 3);

        for i in 0..12 {
            pool.dispatch(Job {
                ticket: Ticket(i),
                descriptor: RequestDescriptor::new("m", format!("p{}", i), "RAG"),
            })
            .unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..12 {
            seen.push(pool.next_completion().await.unwrap().ticket.unwrap());
        }
        seen.sort();
        assert_eq!(seen, (0..12).map(Ticket).collect::<Vec<_>>());
        for c in &clients {
            assert_eq!(c.overlapped.load(Ordering::SeqCst), 0);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_client_still_yields_one_completion() {
        let mut pool =
            WorkerPool::new(vec![Arc::new(PanickingClient)], RetryPolicy::default()).unwrap();
        pool.dispatch(Job {
            ticket: Ticket(7),
            descriptor: RequestDescriptor::new("m", "boom", "RAG"),
        })
        .unwrap();
        let done = pool.next_completion().await.unwrap();
        assert_eq!(done.ticket, Some(Ticket(7)));
        assert!(done.is_error());
        assert_eq!(done.request_config.prompt_text(), "boom");
        pool.shutdown().await;
    }
}
