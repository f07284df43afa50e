//! Typed structural queries over parsed HTML
//!
//! Wraps `scraper::Html` so callers ask for elements by id or class and get
//! `Option`s and iterators back, instead of matching on raw markup.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// A link found inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: Option<String>,
    pub text: String,
}

pub struct Document {
    html: Html,
}

impl Document {
    /// Parse a full page.
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    /// Parse a snippet such as a post fragment or a post body.
    pub fn parse_fragment(html: &str) -> Self {
        Self {
            html: Html::parse_fragment(html),
        }
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.html.root_element().descendants().filter_map(ElementRef::wrap)
    }

    /// First element whose `id` attribute equals `id`.
    pub fn find_by_id(&self, id: &str) -> Option<ElementRef<'_>> {
        self.elements().find(|el| el.value().id() == Some(id))
    }

    /// Every element carrying `class`, in document order.
    pub fn find_by_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        self.elements().filter(move |el| has_class(el, class))
    }

    /// Every element matching a CSS selector, in document order.
    pub fn select_all(&self, selector: &str) -> DocumentResult<Vec<ElementRef<'_>>> {
        let parsed = Selector::parse(selector).map_err(|e| DocumentError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.html.select(&parsed).collect())
    }
}

pub fn has_class(el: &ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

/// Descendants of `el` (excluding `el` itself) carrying `class`.
pub fn descendants_by_class<'a>(el: ElementRef<'a>, class: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(move |child| has_class(child, class))
}

/// Every `<a>` inside `el`, in document order.
pub fn links(el: ElementRef<'_>) -> Vec<Link> {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name().eq_ignore_ascii_case("a"))
        .map(|a| Link {
            href: a
                .value()
                .attr("href")
                .map(str::trim)
                .filter(|href| !href.is_empty())
                .map(str::to_string),
            text: text(a),
        })
        .collect()
}

/// Whitespace-trimmed text content.
pub fn text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Serialized markup of the element, including its own tag.
pub fn outer_html(el: ElementRef<'_>) -> String {
    el.html()
}
