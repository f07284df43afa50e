//! Bounded download pool
//!
//! Every download task of a run is spawned onto the tokio runtime, with a
//! semaphore capping how many fetches are in flight at once.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::archive::fetcher::{ArtifactFetcher, FetchError, FetchOutcome};
use crate::archive::DownloadTask;

pub struct DownloadPool {
    fetcher: Arc<ArtifactFetcher>,
    semaphore: Arc<Semaphore>,
    handles: Vec<(DownloadTask, JoinHandle<FetchOutcome>)>,
}

impl DownloadPool {
    pub fn new(fetcher: Arc<ArtifactFetcher>, max_concurrency: usize) -> Self {
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            handles: Vec::new(),
        }
    }

    /// Queue a task. Waits for a free slot before spawning it.
    pub async fn submit(&mut self, task: DownloadTask) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(error = %e, "Download pool semaphore closed, running unbounded");
                None
            }
        };

        let fetcher = self.fetcher.clone();
        let job = task.clone();
        let handle = tokio::spawn(async move {
            let outcome = fetcher.fetch(&job.url, &job.directory, &job.filename).await;
            drop(permit);
            outcome
        });

        debug!(url = %task.url, "Submitted download");
        self.handles.push((task, handle));
    }

    /// Wait for every submitted task and return its outcome, in submission order.
    pub async fn finish(self) -> Vec<(DownloadTask, FetchOutcome)> {
        let mut outcomes = Vec::with_capacity(self.handles.len());

        for (task, handle) in self.handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(url = %task.url, error = %e, "Download task did not complete");
                    FetchOutcome::Failed {
                        path: ArtifactFetcher::destination(&task.directory, &task.filename),
                        error: FetchError::Stream(format!("download task aborted: {}", e)),
                    }
                }
            };
            outcomes.push((task, outcome));
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_pool_returns_outcomes_in_submission_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ArtifactFetcher::new(Client::new(), false));
        let mut pool = DownloadPool::new(fetcher, 2);

        for i in 0..5 {
            let url = format!("{}/file{}.bin", server.uri(), i);
            pool.submit(DownloadTask::new(url, dir.path(), format!("file{}.bin", i))).await;
        }

        let outcomes = pool.finish().await;
        assert_eq!(outcomes.len(), 5);
        for (i, (task, outcome)) in outcomes.iter().enumerate() {
            assert_eq!(task.filename, format!("file{}.bin", i));
            assert!(outcome.is_saved());
        }
    }

    #[tokio::test]
    async fn test_duplicate_destinations_download_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/same.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ArtifactFetcher::new(Client::new(), false));
        let mut pool = DownloadPool::new(fetcher, 4);
        let url = format!("{}/same.png", server.uri());
        pool.submit(DownloadTask::new(url.clone(), dir.path(), "same.png")).await;
        pool.submit(DownloadTask::new(url, dir.path(), "same.png")).await;

        let outcomes = pool.finish().await;
        let saved = outcomes.iter().filter(|(_, o)| o.is_saved()).count();
        let skipped = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Skipped { .. }))
            .count();
        assert_eq!((saved, skipped), (1, 1));
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_makes_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ArtifactFetcher::new(Client::new(), false));
        let mut pool = DownloadPool::new(fetcher, 0);
        pool.submit(DownloadTask::new(format!("{}/a", server.uri()), dir.path(), "a")).await;
        pool.submit(DownloadTask::new(format!("{}/b", server.uri()), dir.path(), "b")).await;

        assert!(pool.finish().await.iter().all(|(_, o)| o.is_saved()));
    }
}
