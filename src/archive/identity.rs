//! Creator identity resolution
//!
//! Accepts a numeric creator ID, a site URL embedding one, or a display name,
//! and finds the matching entry in the creator directory.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::archive::CreatorRef;

static SITE_URL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)((http)?(s?))://yiff\.party(/patreon)?/").expect("static regex"));
static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("static regex"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid creator identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("No creator found matching {0:?}")]
    NotFound(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// What the user typed, after URL stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatorQuery {
    Id(u64),
    Name(String),
}

/// Strip the site URL prefix and classify the remainder.
pub fn parse_query(input: &str) -> IdentityResult<CreatorQuery> {
    let stripped = SITE_URL_PREFIX.replace_all(input, "");
    let stripped = stripped.trim().trim_end_matches('/').trim();

    if stripped.is_empty() {
        return Err(IdentityError::InvalidIdentifier(input.to_string()));
    }

    if NUMERIC_ID.is_match(stripped) {
        return stripped
            .parse::<u64>()
            .map(CreatorQuery::Id)
            .map_err(|_| IdentityError::InvalidIdentifier(input.to_string()));
    }

    Ok(CreatorQuery::Name(stripped.to_string()))
}

/// Find the creator matching `input` in `directory`.
pub fn resolve(input: &str, directory: &[CreatorRef]) -> IdentityResult<CreatorRef> {
    let query = parse_query(input)?;
    debug!(?query, candidates = directory.len(), "Resolving creator");

    let found = match &query {
        CreatorQuery::Id(id) => directory.iter().find(|creator| creator.id == *id),
        CreatorQuery::Name(name) => {
            let wanted = name.trim().to_lowercase();
            directory
                .iter()
                .find(|creator| creator.name.trim().to_lowercase() == wanted)
        }
    };

    found
        .cloned()
        .ok_or_else(|| IdentityError::NotFound(input.to_string()))
}
