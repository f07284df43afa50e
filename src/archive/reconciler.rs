//! Post Reconciler
//!
//! Joins a post's JSON record with its crawled HTML fragment and turns both
//! into download tasks plus the text artifacts saved next to them.

use std::path::Path;

use reqwest::Url;
use tracing::{debug, warn};

use crate::archive::crawler::PostIndex;
use crate::archive::document::{self, Document};
use crate::archive::path_namer::url_file_name;
use crate::archive::site_client::resolve_against;
use crate::archive::{AuxFile, DownloadTask, PostRecord};

/// Only cards whose title contains this (case-sensitive) are scraped for links.
pub const MEDIA_CARD_MARKER: &str = "Media";

pub const CARD_SECTION_CLASS: &str = "card-attachments";
pub const CARD_TITLE_CLASS: &str = "card-title";
pub const EMBED_CLASS: &str = "card-embed";

pub const POST_BODY_FILE: &str = "_post_body.html";
pub const EMBED_URLS_FILE: &str = "_embed_urls.txt";
pub const EMBED_BODY_FILE: &str = "_embed_body.html";

/// Everything one post contributes to the archive.
#[derive(Debug, Default)]
pub struct ReconciledPost {
    pub body_file: Option<AuxFile>,
    pub tasks: Vec<DownloadTask>,
    pub aux_files: Vec<AuxFile>,
    pub fragment_missing: bool,
}

pub fn is_media_card(title: &str) -> bool {
    title.contains(MEDIA_CARD_MARKER)
}

/// Point inline media references at the post directory itself.
pub fn rewrite_inline_refs(body: &str, post_id: u64) -> String {
    body.replace(&format!("/patreon_inline/{}/", post_id), "./")
}

/// Raw `src` of every `<img>` in a post body, in document order.
pub fn inline_image_sources(body: &str) -> Vec<String> {
    let doc = Document::parse_fragment(body);
    match doc.select_all("img[src]") {
        Ok(images) => images
            .into_iter()
            .filter_map(|img| img.value().attr("src"))
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not scan post body for images");
            Vec::new()
        }
    }
}

pub struct Reconciler {
    base_url: Url,
}

impl Reconciler {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn resolve(&self, post_id: u64, reference: &str) -> Option<Url> {
        match resolve_against(&self.base_url, reference) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(post_id, error = %e, "Skipping unresolvable reference");
                None
            }
        }
    }

    /// Collect every artifact for `post`, to be stored under `post_dir`.
    pub fn reconcile(&self, post: &PostRecord, index: &PostIndex, post_dir: &Path) -> ReconciledPost {
        let mut reconciled = ReconciledPost::default();

        if let Some(body) = post.body.as_deref().filter(|body| !body.trim().is_empty()) {
            reconciled.body_file = Some(AuxFile::new(POST_BODY_FILE, rewrite_inline_refs(body, post.id)));
            self.inline_images(post.id, body, post_dir, &mut reconciled.tasks);
        }

        match index.get(post.id) {
            Some(fragment) => self.fragment_artifacts(post.id, &fragment.html, post_dir, &mut reconciled),
            None => {
                warn!(post_id = post.id, "No HTML fragment for post, media cards and embeds unavailable");
                reconciled.fragment_missing = true;
            }
        }

        for attachment in &post.attachments {
            if attachment.file_url.trim().is_empty() {
                warn!(post_id = post.id, file_name = %attachment.file_name, "Attachment has no URL -- Skipping");
                continue;
            }
            reconciled
                .tasks
                .push(DownloadTask::new(attachment.file_url.trim(), post_dir, &attachment.file_name));
        }

        if let Some(post_file) = post.post_file.as_ref().filter(|f| !f.file_url.trim().is_empty()) {
            let filename = if post_file.file_name.trim().is_empty() {
                url_file_name(&post_file.file_url)
            } else {
                post_file.file_name.clone()
            };
            reconciled
                .tasks
                .push(DownloadTask::new(post_file.file_url.trim(), post_dir, filename));
        }

        debug!(
            post_id = post.id,
            tasks = reconciled.tasks.len(),
            aux_files = reconciled.aux_files.len(),
            "Reconciled post"
        );
        reconciled
    }

    fn inline_images(&self, post_id: u64, body: &str, post_dir: &Path, tasks: &mut Vec<DownloadTask>) {
        for src in inline_image_sources(body) {
            if src.starts_with("data:") {
                debug!(post_id, "Skipping embedded data URI image");
                continue;
            }
            if let Some(url) = self.resolve(post_id, &src) {
                // Named from the reference as written, so it matches the rewritten body.
                let filename = url_file_name(&src);
                tasks.push(DownloadTask::new(url.as_str(), post_dir, filename));
            }
        }
    }

    fn fragment_artifacts(&self, post_id: u64, html: &str, post_dir: &Path, reconciled: &mut ReconciledPost) {
        let doc = Document::parse_fragment(html);
        let Some(post_el) = doc.find_by_id(&format!("p{}", post_id)) else {
            warn!(post_id, "HTML fragment does not contain the post element");
            return;
        };

        for card in document::descendants_by_class(post_el, CARD_SECTION_CLASS) {
            let title = document::descendants_by_class(card, CARD_TITLE_CLASS)
                .next()
                .map(document::text)
                .unwrap_or_default();
            if !is_media_card(&title) {
                debug!(post_id, title = %title, "Ignoring non-media card");
                continue;
            }

            for link in document::links(card) {
                let Some(href) = link.href else {
                    continue;
                };
                let Some(url) = self.resolve(post_id, &href) else {
                    continue;
                };
                let filename = if link.text.is_empty() {
                    url_file_name(url.as_str())
                } else {
                    link.text
                };
                reconciled.tasks.push(DownloadTask::new(url.as_str(), post_dir, filename));
            }
        }

        if let Some(embed) = document::descendants_by_class(post_el, EMBED_CLASS).next() {
            let urls: Vec<String> = document::links(embed).into_iter().filter_map(|link| link.href).collect();
            if !urls.is_empty() {
                reconciled.aux_files.push(AuxFile::new(EMBED_URLS_FILE, urls.join("\n")));
            }
            reconciled
                .aux_files
                .push(AuxFile::new(EMBED_BODY_FILE, document::outer_html(embed)));
        }
    }
}
