//! Pagination Crawler
//!
//! This module provides functionality for:
//! 1. Fetching the first listing page and reading its pagination indicator
//! 2. Fetching the remaining pages with bounded concurrency
//! 3. Merging every page's post fragments into one index keyed by post ID
//!
//! Pages are merged strictly in page order, so an ID that shows up twice keeps
//! the fragment from the earlier page and the collision is reported.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::archive::document::{self, Document};
use crate::archive::{SiteClient, SiteError};

/// Class carried by every post card on a listing page.
pub const POST_CLASS: &str = "yp-post";
/// Class of the element holding the `current / total` page indicator.
pub const PAGINATION_CLASS: &str = "paginate-count";
/// Upper bound on the page count taken from an indicator.
pub const MAX_LISTING_PAGES: u32 = 10_000;

static PAGINATION_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").expect("static regex"));
static POST_ELEMENT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^p(\d+)$").expect("static regex"));

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Site error: {0}")]
    Site(#[from] SiteError),

    #[error("Unparsable pagination indicator: {0:?}")]
    Pagination(String),
}

pub type CrawlResult<T> = Result<T, CrawlError>;

/// The HTML subtree for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFragment {
    pub post_id: u64,
    pub html: String,
}

/// Post fragments from every crawled page, keyed by post ID.
#[derive(Debug, Default)]
pub struct PostIndex {
    fragments: HashMap<u64, PostFragment>,
}

impl PostIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fragment unless its ID is already present. Returns `false` on collision.
    pub fn insert(&mut self, fragment: PostFragment) -> bool {
        if self.fragments.contains_key(&fragment.post_id) {
            return false;
        }
        self.fragments.insert(fragment.post_id, fragment);
        true
    }

    pub fn get(&self, post_id: u64) -> Option<&PostFragment> {
        self.fragments.get(&post_id)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    #[cfg(test)]
    pub fn post_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.fragments.keys().copied()
    }
}

/// `current / total` as shown on a listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current: u32,
    pub total: u32,
}

/// What one listing page contributes to the crawl.
#[derive(Debug)]
pub struct ListingPage {
    pub pagination: Option<CrawlResult<Pagination>>,
    pub fragments: Vec<PostFragment>,
}

/// Outcome of crawling every listing page for a creator.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub index: PostIndex,
    pub total_pages: u32,
    pub failed_pages: Vec<u32>,
    pub collisions: Vec<u64>,
}

impl CrawlReport {
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty()
    }

    fn merge(&mut self, page: u32, fragments: Vec<PostFragment>) {
        let found = fragments.len();
        for fragment in fragments {
            let post_id = fragment.post_id;
            if !self.index.insert(fragment) {
                warn!(page, post_id, "Post already indexed from an earlier page, keeping the first fragment");
                self.collisions.push(post_id);
            }
        }
        debug!(page, found, indexed = self.index.len(), "Merged listing page");
    }
}

pub fn parse_pagination(text: &str) -> CrawlResult<Pagination> {
    let caps = PAGINATION_TEXT
        .captures(text)
        .ok_or_else(|| CrawlError::Pagination(text.to_string()))?;

    let current = caps[1].parse::<u32>().map_err(|_| CrawlError::Pagination(text.to_string()))?;
    let total = caps[2].parse::<u32>().map_err(|_| CrawlError::Pagination(text.to_string()))?;

    if current == 0 || total == 0 || current > total {
        return Err(CrawlError::Pagination(text.to_string()));
    }

    Ok(Pagination { current, total })
}

/// Extract the pagination indicator and every post fragment from one page.
pub fn parse_listing_page(html: &str) -> ListingPage {
    let doc = Document::parse(html);

    let pagination = doc
        .find_by_class(PAGINATION_CLASS)
        .next()
        .map(|el| parse_pagination(&document::text(el)));

    let fragments = doc
        .find_by_class(POST_CLASS)
        .filter_map(|el| {
            let id = el.value().id()?;
            let post_id = POST_ELEMENT_ID.captures(id)?.get(1)?.as_str().parse::<u64>().ok()?;
            Some(PostFragment {
                post_id,
                html: document::outer_html(el),
            })
        })
        .collect();

    ListingPage { pagination, fragments }
}

pub struct Crawler {
    client: SiteClient,
    max_page_concurrency: usize,
    max_pages: u32,
}

impl Crawler {
    pub fn new(client: SiteClient, max_page_concurrency: usize) -> Self {
        Self {
            client,
            max_page_concurrency: max_page_concurrency.max(1),
            max_pages: MAX_LISTING_PAGES,
        }
    }

    #[cfg(test)]
    fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn fetch_page(&self, creator_id: u64, page: u32) -> CrawlResult<Vec<PostFragment>> {
        let html = self.client.fetch_listing_page(creator_id, page).await?;
        Ok(parse_listing_page(&html).fragments)
    }

    /// Crawl every listing page for `creator_id`. Failures are recorded, never fatal.
    #[instrument(skip(self))]
    pub async fn crawl_all(&self, creator_id: u64) -> CrawlReport {
        let mut report = CrawlReport::default();

        let first = match self.client.fetch_listing_page(creator_id, 1).await {
            Ok(html) => parse_listing_page(&html),
            Err(e) => {
                warn!(error = %e, "Failed to fetch the first listing page, HTML-derived artifacts will be unavailable");
                report.total_pages = 1;
                report.failed_pages.push(1);
                return report;
            }
        };

        report.total_pages = match first.pagination {
            None => 1,
            Some(Ok(pagination)) if pagination.total > self.max_pages => {
                warn!(
                    current = pagination.current,
                    claimed = pagination.total,
                    max_pages = self.max_pages,
                    "Page indicator exceeds the page limit, crawling only the first pages"
                );
                self.max_pages
            }
            Some(Ok(pagination)) => {
                debug!(current = pagination.current, total = pagination.total, "Read page indicator");
                pagination.total
            }
            Some(Err(e)) => {
                warn!(error = %e, "Treating listing as a single page");
                1
            }
        };
        info!(total_pages = report.total_pages, "Crawling listing pages");
        report.merge(1, first.fragments);

        let mut pages = stream::iter(2..=report.total_pages)
            .map(|page| async move { (page, self.fetch_page(creator_id, page).await) })
            .buffered(self.max_page_concurrency);

        while let Some((page, result)) = pages.next().await {
            match result {
                Ok(fragments) => report.merge(page, fragments),
                Err(e) => {
                    warn!(page, error = %e, "Failed to crawl listing page, continuing");
                    report.failed_pages.push(page);
                }
            }
        }

        if !report.is_complete() {
            warn!(
                failed_pages = ?report.failed_pages,
                total_pages = report.total_pages,
                "Listing crawl incomplete"
            );
        }

        report
    }
}
