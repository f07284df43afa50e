//! Path naming for the archive layout
//!
//! Everything here is a pure string transform. Directory creation happens in
//! the orchestrator.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::archive::CreatorRef;

/// Titles longer than this are cut before they become part of a directory name.
pub const MAX_TITLE_CHARS: usize = 60;
/// Number of characters kept from an over-long title.
pub const TRUNCATED_TITLE_CHARS: usize = 59;
/// Upper bound on a stored filename in UTF-8 bytes, leaving room for the `.part` suffix
/// under the common 255-byte name limit.
pub const MAX_FILENAME_BYTES: usize = 255 - ".part".len();
/// Longest suffix still treated as an extension when a name has to be shortened.
const MAX_EXTENSION_BYTES: usize = 16;

static UNSAFE_SEGMENT_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9-]").expect("static regex"));
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("static regex"));

/// Replace every character outside `[A-Za-z0-9-]` with `_` and collapse runs of underscores.
pub fn sanitize_segment(text: &str) -> String {
    let replaced = UNSAFE_SEGMENT_CHARS.replace_all(text, "_");
    UNDERSCORE_RUNS.replace_all(&replaced, "_").into_owned()
}

/// Sanitize a filename by replacing characters that are invalid on common filesystems.
///
/// Dots inside the name are kept so extensions survive.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_matches('.').trim();
    let capped = cap_filename(trimmed);

    if capped.is_empty() {
        "file".to_string()
    } else {
        capped
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Shorten the stem of an over-long name, keeping its extension.
fn cap_filename(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }

    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= MAX_EXTENSION_BYTES => {
            let stem = truncate_to_bytes(stem, MAX_FILENAME_BYTES - ext.len() - 1).trim_end();
            format!("{}.{}", stem, ext)
        }
        _ => truncate_to_bytes(name, MAX_FILENAME_BYTES).trim_end().to_string(),
    }
}

/// Render a unix timestamp as `YYYY-MM-DD` (UTC).
pub fn format_post_date(created: i64) -> String {
    DateTime::from_timestamp(created, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "0000-00-00".to_string())
}

/// The title part of a post directory name, before sanitization.
pub fn title_component(title: &str) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        title.chars().take(TRUNCATED_TITLE_CHARS).collect()
    } else {
        title.to_string()
    }
}

/// `base/<date>_<title>_<post id>`
pub fn build_post_dir(base: &Path, date: &str, title: &str, post_id: u64) -> PathBuf {
    let name = format!("{}_{}_{}", date, sanitize_segment(&title_component(title)), post_id);
    base.join(name)
}

/// Root directory for one creator's archive.
pub fn creator_dir(base: &Path, creator: &CreatorRef, nest_by_creator: bool) -> PathBuf {
    if nest_by_creator {
        let name = sanitize_segment(creator.name.trim());
        if name.is_empty() || name == "_" {
            base.join(creator.id.to_string())
        } else {
            base.join(name)
        }
    } else {
        base.to_path_buf()
    }
}

/// Last path segment of a URL, percent-decoded, ignoring any query string or fragment.
///
/// Works on raw references as written in markup as well as on parsed URLs, and
/// gives the same name for both.
pub fn url_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let segment = without_query.rsplit('/').next().unwrap_or(without_query);
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_adjacent_underscores(s: &str) -> bool {
        s.contains("__")
    }

    #[test]
    fn test_sanitize_segment_replaces_and_collapses() {
        assert_eq!(sanitize_segment("Hello, World!"), "Hello_World_");
        assert_eq!(sanitize_segment("a  /  b"), "a_b");
        assert_eq!(sanitize_segment("keep-dashes_and_123"), "keep-dashes_and_123");
        assert_eq!(sanitize_segment("émoji 🎉 title"), "_moji_title");
    }

    #[test]
    fn test_sanitize_segment_is_idempotent_and_clean() {
        let inputs = [
            "Hello, World!",
            "___leading and trailing___",
            "日本語のタイトル",
            "a!!b??c..d",
            "WIP: sketch (part 2/3)",
        ];
        for input in inputs {
            let once = sanitize_segment(input);
            assert_eq!(sanitize_segment(&once), once, "not idempotent for {input:?}");
            assert!(!has_adjacent_underscores(&once), "adjacent underscores in {once:?}");
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_sanitize_filename_keeps_extension() {
        assert_eq!(sanitize_filename("my:file?.png"), "my_file_.png");
        assert_eq!(sanitize_filename("dir/name.tar.gz"), "dir_name.tar.gz");
        assert_eq!(sanitize_filename("  ..hidden.  "), "hidden");
        assert_eq!(sanitize_filename("..."), "file");
        assert_eq!(sanitize_filename("tab\there.txt"), "tab_here.txt");
    }

    #[test]
    fn test_sanitize_filename_caps_length_and_keeps_extension() {
        let long = "x".repeat(500) + ".png";
        let capped = sanitize_filename(&long);
        assert_eq!(capped.len(), MAX_FILENAME_BYTES);
        assert!(capped.ends_with(".png"));
        assert_eq!(sanitize_filename(&capped), capped);

        let no_ext = "y".repeat(400);
        assert_eq!(sanitize_filename(&no_ext).len(), MAX_FILENAME_BYTES);
    }

    #[test]
    fn test_sanitize_filename_caps_multibyte_names_by_bytes() {
        let long = "絵".repeat(120) + ".png";
        let capped = sanitize_filename(&long);
        assert!(capped.len() <= MAX_FILENAME_BYTES);
        assert!(capped.ends_with(".png"));
        assert!(capped.starts_with("絵絵"));
        assert_eq!(capped.trim_end_matches(".png").chars().count(), (MAX_FILENAME_BYTES - 4) / 3);

        let short = "絵".repeat(20) + ".png";
        assert_eq!(sanitize_filename(&short), short);
    }

    #[test]
    fn test_long_titles_are_truncated_before_sanitizing() {
        let title = "A".repeat(61);
        assert_eq!(title_component(&title).chars().count(), 59);

        let exact = "B".repeat(60);
        assert_eq!(title_component(&exact), exact);

        let multibyte = "é".repeat(80);
        assert_eq!(title_component(&multibyte).chars().count(), 59);
    }

    #[test]
    fn test_build_post_dir() {
        let dir = build_post_dir(Path::new("/out"), "2019-01-01", "New Year's Sketch!", 123);
        assert_eq!(dir, PathBuf::from("/out/2019-01-01_New_Year_s_Sketch__123"));
    }

    #[test]
    fn test_format_post_date_zero_pads() {
        assert_eq!(format_post_date(1546300800), "2019-01-01");
        assert_eq!(format_post_date(1565049600), "2019-08-06");
    }

    #[test]
    fn test_creator_dir_nesting() {
        let creator = CreatorRef { id: 5, name: "Foo Bar".to_string() };
        assert_eq!(creator_dir(Path::new("/out"), &creator, false), PathBuf::from("/out"));
        assert_eq!(creator_dir(Path::new("/out"), &creator, true), PathBuf::from("/out/Foo_Bar"));

        let unnamed = CreatorRef { id: 9, name: "   ".to_string() };
        assert_eq!(creator_dir(Path::new("/out"), &unnamed, true), PathBuf::from("/out/9"));
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(url_file_name("https://yiff.party/patreon_inline/1/a.png"), "a.png");
        assert_eq!(url_file_name("https://host/x/y.jpg?token=1#frag"), "y.jpg");
        assert_eq!(url_file_name("https://host/x/my%20pic.png"), "my pic.png");
        assert_eq!(url_file_name("/patreon_inline/7/my pic.png"), "my pic.png");
        assert_eq!(url_file_name("https://host/%E7%94%BB%E5%83%8F.png"), "画像.png");
    }
}
