//! Artifact Fetcher
//!
//! This module provides the idempotent download primitive:
//! 1. Skips any destination that already exists, without touching the network
//! 2. Streams response bodies to disk without buffering them in memory
//! 3. Writes to a `.part` file and renames it into place only on success
//! 4. Serializes concurrent fetches that target the same destination

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::Client;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::archive::path_namer::sanitize_filename;
use crate::archive::AuxFile;

/// Suffix of the temporary file a download streams into.
pub const PARTIAL_SUFFIX: &str = "part";

/// Error types for a single fetch
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Result of one fetch or aux-file write.
#[derive(Debug)]
pub enum FetchOutcome {
    Saved { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
    Failed { path: PathBuf, error: FetchError },
}

impl FetchOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Saved { path, .. }
            | FetchOutcome::Skipped { path }
            | FetchOutcome::Failed { path, .. } => path,
        }
    }

    #[cfg(test)]
    pub fn is_saved(&self) -> bool {
        matches!(self, FetchOutcome::Saved { .. })
    }
}

pub struct ArtifactFetcher {
    client: Client,
    path_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    progress: Option<MultiProgress>,
}

impl ArtifactFetcher {
    pub fn new(client: Client, show_progress: bool) -> Self {
        Self {
            client,
            path_locks: DashMap::new(),
            progress: show_progress.then(MultiProgress::new),
        }
    }

    /// Destination path for `filename` inside `directory`.
    pub fn destination(directory: &Path, filename: &str) -> PathBuf {
        directory.join(sanitize_filename(filename))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, path: &Path) {
        self.path_locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Download `url` to `directory/filename` unless that file already exists.
    #[instrument(skip(self, directory), fields(path = tracing::field::Empty))]
    pub async fn fetch(&self, url: &str, directory: &Path, filename: &str) -> FetchOutcome {
        let path = Self::destination(directory, filename);
        tracing::Span::current().record("path", tracing::field::display(path.display()));

        let lock = self.lock_for(&path);
        let outcome = {
            let _guard = lock.lock().await;
            if fs::try_exists(&path).await.unwrap_or(false) {
                info!("File already exists: {} -- Skipping", path.display());
                FetchOutcome::Skipped { path }
            } else {
                match self.download(url, &path).await {
                    Ok(bytes) => {
                        info!("Downloaded {} ({} bytes)", path.display(), bytes);
                        FetchOutcome::Saved { path, bytes }
                    }
                    Err(error) => {
                        warn!(%error, "An error occurred downloading URL: {} -- could not save {}", url, path.display());
                        FetchOutcome::Failed { path, error }
                    }
                }
            }
        };
        drop(lock);
        self.release_lock(outcome.path());

        outcome
    }

    /// Write a small text artifact with the same naming and skip-on-exists rules as `fetch`.
    pub async fn write_aux(&self, directory: &Path, aux: &AuxFile) -> FetchOutcome {
        let path = Self::destination(directory, &aux.name);

        let lock = self.lock_for(&path);
        let outcome = {
            let _guard = lock.lock().await;
            if fs::try_exists(&path).await.unwrap_or(false) {
                debug!("Aux file already exists: {} -- Skipping", path.display());
                FetchOutcome::Skipped { path }
            } else {
                match write_atomically(&path, aux.content.as_bytes()).await {
                    Ok(()) => {
                        debug!("Saved aux file {}", path.display());
                        FetchOutcome::Saved {
                            path,
                            bytes: aux.content.len() as u64,
                        }
                    }
                    Err(e) => {
                        warn!("Error writing file: {}: {}", path.display(), e);
                        FetchOutcome::Failed {
                            path,
                            error: FetchError::Io(e),
                        }
                    }
                }
            }
        };
        drop(lock);
        self.release_lock(outcome.path());

        outcome
    }

    async fn download(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bar = self.progress_bar(response.content_length(), path);
        let temp_path = partial_path(path);

        let result = stream_to_file(response, &temp_path, &bar).await;
        bar.finish_and_clear();

        match result {
            Ok(bytes) => {
                fs::rename(&temp_path, path).await?;
                Ok(bytes)
            }
            Err(e) => {
                // Clean up the temp file if it exists
                if let Err(remove_err) = fs::remove_file(&temp_path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial file {}: {}", temp_path.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn progress_bar(&self, length: Option<u64>, path: &Path) -> ProgressBar {
        let Some(progress) = &self.progress else {
            return ProgressBar::hidden();
        };

        let bar = progress.add(ProgressBar::new(length.unwrap_or(0)));
        if let Ok(style) = ProgressStyle::with_template("Downloading file: {msg} - [{bar:20}] {percent}%") {
            bar.set_style(style.progress_chars("= "));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        bar.set_message(name);
        bar
    }
}

/// `<path>.part`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Stream a response to a file
async fn stream_to_file(response: reqwest::Response, file_path: &Path, bar: &ProgressBar) -> Result<u64, FetchError> {
    let mut file = File::create(file_path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::Stream(format!("Failed to get chunk: {}", e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        bar.inc(chunk.len() as u64);
    }

    // Ensure all data is written to disk
    file.flush().await?;

    Ok(written)
}

async fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = partial_path(path);
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ArtifactFetcher {
        ArtifactFetcher::new(Client::new(), false)
    }

    #[tokio::test]
    async fn test_existing_destination_is_skipped_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"old").unwrap();

        let outcome = fetcher()
            .fetch(&format!("{}/a.png", server.uri()), dir.path(), "a.png")
            .await;

        assert!(matches!(outcome, FetchOutcome::Skipped { .. }));
        assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_fresh_destination_matches_payload_length() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/media/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("{}/media/big.bin", server.uri()), dir.path(), "big.bin")
            .await;

        match outcome {
            FetchOutcome::Saved { path, bytes } => {
                assert_eq!(bytes, payload.len() as u64);
                assert_eq!(std::fs::metadata(&path).unwrap().len(), payload.len() as u64);
                assert!(!partial_path(&path).exists());
            }
            other => panic!("expected Saved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_status_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("{}/gone.png", server.uri()), dir.path(), "gone.png")
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed { error: FetchError::Status(404), .. }));
        assert!(!dir.path().join("gone.png").exists());
        assert!(!partial_path(&dir.path().join("gone.png")).exists());
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_no_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 100000\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(&[7u8; 5000]).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let dir = tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("http://{}/big.bin", addr), dir.path(), "big.bin")
            .await;

        assert!(
            matches!(outcome, FetchOutcome::Failed { error: FetchError::Stream(_), .. }),
            "unexpected outcome {:?}",
            outcome
        );
        assert!(!dir.path().join("big.bin").exists());
        assert!(!partial_path(&dir.path().join("big.bin")).exists());
    }

    #[tokio::test]
    async fn test_long_multibyte_name_is_saved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("img"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let name = "絵".repeat(120) + ".png";
        let outcome = fetcher().fetch(&format!("{}/e.png", server.uri()), dir.path(), &name).await;

        assert!(outcome.is_saved(), "unexpected outcome {:?}", outcome);
        let stored = outcome.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(stored.len() <= 255 - ".part".len());
        assert!(stored.ends_with(".png"));
        assert_eq!(std::fs::read_to_string(outcome.path()).unwrap(), "img");
    }

    #[tokio::test]
    async fn test_transport_error_is_failed() {
        let dir = tempdir().unwrap();
        let outcome = fetcher()
            .fetch("http://127.0.0.1:9/unreachable.png", dir.path(), "unreachable.png")
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed { error: FetchError::Request(_), .. }));
        assert!(!dir.path().join("unreachable.png").exists());
    }

    #[tokio::test]
    async fn test_filename_is_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("{}/f", server.uri()), dir.path(), "what?:is<this>.txt")
            .await;

        assert_eq!(outcome.path(), dir.path().join("what__is_this_.txt"));
        assert!(outcome.is_saved());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_of_same_path_download_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(fetcher());
        let url = format!("{}/same.png", server.uri());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fetcher = fetcher.clone();
                let url = url.clone();
                let directory = dir.path().to_path_buf();
                tokio::spawn(async move { fetcher.fetch(&url, &directory, "same.png").await })
            })
            .collect();

        let mut saved = 0;
        let mut skipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                FetchOutcome::Saved { .. } => saved += 1,
                FetchOutcome::Skipped { .. } => skipped += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!((saved, skipped), (1, 3));
        assert!(fetcher.path_locks.is_empty());
    }

    #[tokio::test]
    async fn test_write_aux_never_overwrites() {
        let dir = tempdir().unwrap();
        let fetcher = fetcher();

        let first = fetcher.write_aux(dir.path(), &AuxFile::new("_post_body.html", "<p>one</p>")).await;
        let second = fetcher.write_aux(dir.path(), &AuxFile::new("_post_body.html", "<p>two</p>")).await;

        assert!(first.is_saved());
        assert!(matches!(second, FetchOutcome::Skipped { .. }));
        assert_eq!(std::fs::read_to_string(dir.path().join("_post_body.html")).unwrap(), "<p>one</p>");
    }
}
