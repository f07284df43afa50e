//! Archive Orchestrator
//!
//! Drives one archive run end to end:
//! 1. Resolve the creator from the directory listing
//! 2. Fetch the creator's JSON metadata
//! 3. Crawl the HTML listing into a post index
//! 4. Reconcile every post, write its text artifacts and queue its downloads
//! 5. Archive the creator's shared files with their `.meta` sidecars
//!
//! Only identity resolution can fail the run. Everything after it degrades
//! per post or per artifact and is counted in the returned `RunSummary`.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::archive::crawler::{CrawlReport, Crawler};
use crate::archive::download_pool::DownloadPool;
use crate::archive::fetcher::{ArtifactFetcher, FetchOutcome};
use crate::archive::identity::{self, IdentityError};
use crate::archive::path_namer::{build_post_dir, creator_dir, format_post_date};
use crate::archive::reconciler::Reconciler;
use crate::archive::summary::RunSummary;
use crate::archive::{AppConfig, AuxFile, CreatorData, CreatorRef, DownloadTask, SiteClient, SiteError};

/// Directory, under the creator root, holding the shared-files collection.
pub const SHARED_FILES_DIR: &str = "_SharedFiles";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Could not fetch the creator directory: {0}")]
    Directory(#[source] SiteError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    ResolvingIdentity,
    FetchingMetadata,
    Crawling,
    ReconcilingPosts,
    ArchivingSharedFiles,
    Done,
    Failed,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveState::ResolvingIdentity => "resolving identity",
            ArchiveState::FetchingMetadata => "fetching metadata",
            ArchiveState::Crawling => "crawling",
            ArchiveState::ReconcilingPosts => "reconciling posts",
            ArchiveState::ArchivingSharedFiles => "archiving shared files",
            ArchiveState::Done => "done",
            ArchiveState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Make sure `dir` exists as a directory, creating it if needed.
pub async fn ensure_dir(dir: &Path) -> io::Result<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Path {} exists, but is not a directory", dir.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).await?;
            info!("Resolved & created directory: {}", dir.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub struct Orchestrator {
    config: AppConfig,
    client: SiteClient,
    fetcher: Arc<ArtifactFetcher>,
    run_id: String,
    state: ArchiveState,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Result<Self, SiteError> {
        let client = SiteClient::new(&config.http)?;
        let fetcher = Arc::new(ArtifactFetcher::new(client.http().clone(), config.output.show_progress));

        Ok(Self {
            config,
            client,
            fetcher,
            run_id: Uuid::new_v4().to_string(),
            state: ArchiveState::ResolvingIdentity,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    fn transition(&mut self, next: ArchiveState) {
        info!(run_id = %self.run_id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn fail(&mut self, error: ArchiveError) -> ArchiveError {
        error!(run_id = %self.run_id, %error, "Archive run failed");
        self.transition(ArchiveState::Failed);
        error
    }

    /// Archive everything published by the creator `input` identifies.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&mut self, input: &str) -> ArchiveResult<RunSummary> {
        let mut summary = RunSummary::new(self.run_id.clone());
        self.state = ArchiveState::ResolvingIdentity;

        info!("Retrieving creator directory, this can take a few seconds");
        let directory = match self.client.fetch_creator_directory().await {
            Ok(directory) => directory,
            Err(e) => return Err(self.fail(ArchiveError::Directory(e))),
        };
        let creator = match identity::resolve(input, &directory.creators) {
            Ok(creator) => creator,
            Err(e) => return Err(self.fail(e.into())),
        };
        info!(creator_id = creator.id, name = %creator.name, "Found creator");

        let root = creator_dir(
            Path::new(&self.config.paths.output_directory),
            &creator,
            self.config.output.nest_by_creator,
        );
        summary.creator = Some(creator.clone());
        summary.output_directory = root.clone();

        self.transition(ArchiveState::FetchingMetadata);
        let data = match self.client.fetch_creator_data(creator.id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(creator_id = creator.id, error = %e, "Could not fetch creator metadata, nothing to archive");
                summary.metadata_failed = true;
                self.transition(ArchiveState::Done);
                summary.log();
                return Ok(summary);
            }
        };
        summary.posts_seen = data.posts.len();
        summary.shared_files_seen = data.shared_files.len();
        info!(
            creator_id = creator.id,
            posts = data.posts.len(),
            shared_files = data.shared_files.len(),
            "Downloading started for creator: {} ({})",
            creator.name,
            creator.id
        );

        self.transition(ArchiveState::Crawling);
        let report = if data.posts.is_empty() {
            info!(creator_id = creator.id, "No posts, skipping listing crawl");
            CrawlReport::default()
        } else {
            Crawler::new(self.client.clone(), self.config.pools.max_page_concurrency)
                .crawl_all(creator.id)
                .await
        };
        summary.record_crawl(&report);

        self.transition(ArchiveState::ReconcilingPosts);
        self.archive_posts(&creator, &data, &report, &root, &mut summary).await;

        self.transition(ArchiveState::ArchivingSharedFiles);
        self.archive_shared_files(&data, &root, &mut summary).await;

        self.transition(ArchiveState::Done);
        summary.log();
        Ok(summary)
    }

    async fn archive_posts(
        &self,
        creator: &CreatorRef,
        data: &CreatorData,
        report: &CrawlReport,
        root: &Path,
        summary: &mut RunSummary,
    ) {
        let reconciler = Reconciler::new(self.client.base_url().clone());
        let mut pool = DownloadPool::new(self.fetcher.clone(), self.config.pools.max_download_concurrency);

        for (i, post) in data.posts.iter().enumerate() {
            let post_dir = build_post_dir(root, &format_post_date(post.created), &post.title, post.id);
            info!(
                creator_id = creator.id,
                post_id = post.id,
                "Archiving post {}/{}: {}",
                i + 1,
                data.posts.len(),
                post.title
            );

            if let Err(e) = ensure_dir(&post_dir).await {
                error!(post_id = post.id, path = %post_dir.display(), error = %e, "Could not create post directory -- Skipping post");
                summary.posts_skipped += 1;
                continue;
            }

            let reconciled = reconciler.reconcile(post, &report.index, &post_dir);
            if reconciled.fragment_missing {
                summary.fragments_missing += 1;
            }

            for aux in reconciled.body_file.iter().chain(reconciled.aux_files.iter()) {
                let outcome = self.fetcher.write_aux(&post_dir, aux).await;
                summary.record_aux(&outcome);
            }

            for task in reconciled.tasks {
                pool.submit(task).await;
            }
            summary.posts_archived += 1;
        }

        for (task, outcome) in pool.finish().await {
            summary.record_download(&task.url, &outcome);
        }
    }

    async fn archive_shared_files(&self, data: &CreatorData, root: &Path, summary: &mut RunSummary) {
        let shared_dir = root.join(SHARED_FILES_DIR);
        if let Err(e) = ensure_dir(&shared_dir).await {
            error!(path = %shared_dir.display(), error = %e, "Could not create shared files directory");
            return;
        }

        let mut pool = DownloadPool::new(self.fetcher.clone(), self.config.pools.max_download_concurrency);
        let mut records = Vec::new();
        for record in &data.shared_files {
            if record.file_url.trim().is_empty() {
                warn!(shared_file_id = record.id, "Shared file has no URL -- Skipping");
                continue;
            }
            pool.submit(DownloadTask::new(record.file_url.trim(), &shared_dir, record.stored_name()))
                .await;
            records.push(record);
        }

        for ((task, outcome), record) in pool.finish().await.into_iter().zip(records) {
            summary.record_download(&task.url, &outcome);
            if let FetchOutcome::Saved { path, .. } = &outcome {
                info!("Downloaded the shared file: {} - Title: {}", path.display(), record.title);
                let meta = AuxFile::new(meta_file_name(path), record.meta_text());
                let written = self.fetcher.write_aux(&shared_dir, &meta).await;
                summary.record_aux(&written);
            }
        }
    }
}

/// `<stored file name>.meta`
fn meta_file_name(saved: &Path) -> String {
    let name = saved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.meta", name)
}
