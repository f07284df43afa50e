//! Per-run counters, aggregated from every post and artifact outcome.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::archive::crawler::CrawlReport;
use crate::archive::fetcher::FetchOutcome;
use crate::archive::CreatorRef;

/// An artifact that could not be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedArtifact {
    pub url: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub creator: Option<CreatorRef>,
    pub output_directory: PathBuf,

    pub metadata_failed: bool,

    pub pages_total: u32,
    pub pages_failed: Vec<u32>,
    pub post_collisions: usize,

    pub posts_seen: usize,
    pub posts_archived: usize,
    pub posts_skipped: usize,
    pub fragments_missing: usize,

    pub shared_files_seen: usize,

    pub artifacts_saved: usize,
    pub artifacts_skipped: usize,
    pub bytes_saved: u64,
    pub aux_files_saved: usize,
    pub failures: Vec<FailedArtifact>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn record_crawl(&mut self, report: &CrawlReport) {
        self.pages_total = report.total_pages;
        self.pages_failed = report.failed_pages.clone();
        self.post_collisions = report.collisions.len();
    }

    /// Count a downloaded artifact.
    pub fn record_download(&mut self, url: &str, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Saved { bytes, .. } => {
                self.artifacts_saved += 1;
                self.bytes_saved += bytes;
            }
            FetchOutcome::Skipped { .. } => self.artifacts_skipped += 1,
            FetchOutcome::Failed { path, error } => self.failures.push(FailedArtifact {
                url: url.to_string(),
                path: path.clone(),
                reason: error.to_string(),
            }),
        }
    }

    /// Count a written text artifact. Skips of existing aux files are not interesting.
    pub fn record_aux(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Saved { .. } => self.aux_files_saved += 1,
            FetchOutcome::Skipped { .. } => {}
            FetchOutcome::Failed { path, error } => self.failures.push(FailedArtifact {
                url: String::new(),
                path: path.clone(),
                reason: error.to_string(),
            }),
        }
    }

    pub fn artifacts_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn crawl_complete(&self) -> bool {
        self.pages_failed.is_empty()
    }

    /// Emit the summary as one structured log event, plus one warning per failure.
    pub fn log(&self) {
        for failure in &self.failures {
            warn!(
                run_id = %self.run_id,
                url = %failure.url,
                path = %failure.path.display(),
                reason = %failure.reason,
                "Artifact not saved"
            );
        }

        info!(
            run_id = %self.run_id,
            creator_id = self.creator.as_ref().map(|c| c.id),
            posts_seen = self.posts_seen,
            posts_archived = self.posts_archived,
            posts_skipped = self.posts_skipped,
            fragments_missing = self.fragments_missing,
            post_collisions = self.post_collisions,
            pages_total = self.pages_total,
            pages_failed = self.pages_failed.len(),
            shared_files = self.shared_files_seen,
            saved = self.artifacts_saved,
            skipped = self.artifacts_skipped,
            aux_saved = self.aux_files_saved,
            failed = self.artifacts_failed(),
            bytes = self.bytes_saved,
            "Run finished"
        );
    }
}
