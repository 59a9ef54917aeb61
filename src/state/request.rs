//! The immutable description of what a harvest run targets.

use std::fmt;
use url::{ParseError, Url};

/// Characters that are not allowed in a directory name on common filesystems
const UNSAFE_PATH_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// A catalog browse or a full-text search against the remote library
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    query: String,
    is_search: bool,
}

impl Request {
    pub fn new(query: impl Into<String>, is_search: bool) -> Self {
        Self {
            query: query.into(),
            is_search,
        }
    }

    /// Browse the catalog identified by `catalog_id`
    pub fn catalog(catalog_id: impl Into<String>) -> Self {
        Self::new(catalog_id, false)
    }

    /// Page through the results of a search query
    pub fn search(query: impl Into<String>) -> Self {
        Self::new(query, true)
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_search(&self) -> bool {
        self.is_search
    }

    /// Builds the URL of one listing page
    ///
    /// * catalog: `{base}/catalog/{query}/?volumes=page-{n}`
    /// * search: `{base}/search/?q={query}&PAGEN_1={n}`
    pub fn page_url(&self, base: &Url, page_number: u32) -> Result<Url, ParseError> {
        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            if self.is_search {
                segments.push("search");
            } else {
                segments.push("catalog").push(&self.query);
            }
            // Trailing slash
            segments.push("");
        }

        if self.is_search {
            url.query_pairs_mut()
                .clear()
                .append_pair("q", &self.query)
                .append_pair("PAGEN_1", &page_number.to_string());
        } else {
            url.set_query(Some(&format!("volumes=page-{}", page_number)));
        }

        Ok(url)
    }

    /// A filesystem-safe directory name for this request's results
    ///
    /// Search results get a `search_` prefix so a search never shares a
    /// directory with the catalog of the same name.
    pub fn slug(&self) -> String {
        let cleaned: String = self
            .query
            .chars()
            .map(|c| {
                if UNSAFE_PATH_CHARS.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        let trimmed = cleaned.trim().trim_matches('.');
        let name = if trimmed.is_empty() { "query" } else { trimmed };
        if self.is_search {
            format!("search_{}", name)
        } else {
            name.to_string()
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_search { "search" } else { "catalog" };
        write!(f, "{} '{}'", mode, self.query)
    }
}
