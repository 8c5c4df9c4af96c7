// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Paged namespace browsing.
//!
//! Browsing is a mostly-stateless paged listing: the server returns a page
//! of elements plus an opaque continuation token when more remain. The
//! [`BrowseCursor`] wraps that token together with the originating item and
//! filters, so the next page can be requested without restating either.
//!
//! A cursor holds no local resources — only the remote-opaque token — and
//! is safe to drop without any explicit close.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ItemIdentity;

// =============================================================================
// ContinuationToken
// =============================================================================

/// Opaque cursor returned by the server to resume a paged listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(pub String);

impl ContinuationToken {
    /// Creates a token from its opaque string form.
    #[inline]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the opaque string form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the token is empty (servers use an empty token
    /// interchangeably with "no token").
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// BrowseFilters
// =============================================================================

/// What kind of namespace elements a browse returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowseElementFilter {
    /// Every element.
    #[default]
    All,

    /// Only branches (elements with children).
    Branch,

    /// Only items (leaf elements with values).
    Item,
}

/// Filters applied server-side to a browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseFilters {
    /// Which element kinds to return.
    pub element_filter: BrowseElementFilter,

    /// Wildcard filter on element names; empty matches everything.
    pub name_filter: String,

    /// Server-specific filter expression; empty matches everything.
    pub vendor_filter: String,

    /// Maximum elements per page; `0` lets the server choose.
    pub max_elements: u32,
}

impl Default for BrowseFilters {
    fn default() -> Self {
        Self {
            element_filter: BrowseElementFilter::All,
            name_filter: String::new(),
            vendor_filter: String::new(),
            max_elements: 0,
        }
    }
}

impl BrowseFilters {
    /// Creates filters returning everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to a single element kind.
    pub fn element_filter(mut self, filter: BrowseElementFilter) -> Self {
        self.element_filter = filter;
        self
    }

    /// Sets the name wildcard filter.
    pub fn name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = filter.into();
        self
    }

    /// Caps the page size.
    pub fn max_elements(mut self, max: u32) -> Self {
        self.max_elements = max;
        self
    }
}

// =============================================================================
// BrowseElement
// =============================================================================

/// One element of the server namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseElement {
    /// Short display name of the element.
    pub name: String,

    /// Fully qualified item identity, usable in an add.
    pub identity: ItemIdentity,

    /// `true` if the element has children to browse into.
    pub has_children: bool,

    /// `true` if the element is itself a readable item.
    pub is_item: bool,
}

impl BrowseElement {
    /// Creates a leaf item element.
    pub fn item(name: impl Into<String>, identity: ItemIdentity) -> Self {
        Self {
            name: name.into(),
            identity,
            has_children: false,
            is_item: true,
        }
    }

    /// Creates a branch element.
    pub fn branch(name: impl Into<String>, identity: ItemIdentity) -> Self {
        Self {
            name: name.into(),
            identity,
            has_children: true,
            is_item: false,
        }
    }
}

impl fmt::Display for BrowseElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_item { "item" } else { "branch" };
        write!(f, "{} ({})", self.name, kind)
    }
}

// =============================================================================
// BrowseCursor
// =============================================================================

/// Resumable position within a paged browse.
///
/// Returned inside a [`BrowsePage`] while the server reports more elements;
/// absent once enumeration is exhausted (the cursor is retired, and the
/// caller's reference becomes `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseCursor {
    /// The item the browse originated from.
    pub origin: ItemIdentity,

    /// Filters the enumeration was started with.
    pub filters: BrowseFilters,

    /// Server token to resume at.
    pub continuation: ContinuationToken,
}

impl BrowseCursor {
    /// Creates a cursor resuming `origin` at `continuation`.
    pub fn new(origin: ItemIdentity, filters: BrowseFilters, continuation: ContinuationToken) -> Self {
        Self {
            origin,
            filters,
            continuation,
        }
    }
}

/// One caller-facing page of browse results.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowsePage {
    /// Elements on this page.
    pub elements: Vec<BrowseElement>,

    /// Cursor for the next page; `None` when enumeration is exhausted.
    pub cursor: Option<BrowseCursor>,
}

impl BrowsePage {
    /// Returns `true` if more pages remain.
    #[inline]
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_token() {
        let token = ContinuationToken::new("page-2");
        assert_eq!(token.as_str(), "page-2");
        assert!(!token.is_empty());
        assert!(ContinuationToken::new("").is_empty());
    }

    #[test]
    fn test_browse_filters_builder() {
        let filters = BrowseFilters::all()
            .element_filter(BrowseElementFilter::Item)
            .name_filter("Temp*")
            .max_elements(50);
        assert_eq!(filters.element_filter, BrowseElementFilter::Item);
        assert_eq!(filters.name_filter, "Temp*");
        assert_eq!(filters.max_elements, 50);
    }

    #[test]
    fn test_browse_element_kinds() {
        let item = BrowseElement::item("Temperature", ItemIdentity::new("Line1.Temperature"));
        assert!(item.is_item);
        assert!(!item.has_children);

        let branch = BrowseElement::branch("Line1", ItemIdentity::new("Line1"));
        assert!(branch.has_children);
        assert_eq!(format!("{}", branch), "Line1 (branch)");
    }

    #[test]
    fn test_browse_page_has_more() {
        let done = BrowsePage {
            elements: vec![],
            cursor: None,
        };
        assert!(!done.has_more());

        let more = BrowsePage {
            elements: vec![],
            cursor: Some(BrowseCursor::new(
                ItemIdentity::new("Line1"),
                BrowseFilters::all(),
                ContinuationToken::new("next"),
            )),
        };
        assert!(more.has_more());
    }
}
