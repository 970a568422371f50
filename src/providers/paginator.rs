//! Cursor-driven pagination
//!
//! A [`Paginator`] turns a `cursor -> (items, next cursor)` fetch function
//! into a lazy stream of pages. Three cursor styles are supported: opaque
//! server tokens echoed back verbatim, client-computed watermarks (largest
//! timestamp seen so far) and numeric offsets.
//!
//! Termination rules:
//! - no next cursor: exhausted
//! - an empty page: exhausted, whatever cursor came with it
//! - `max_pages` reached while a cursor is still offered: stop and report
//!   the cursor so the caller can resume later

use std::future::Future;

use futures::{Stream, TryStreamExt};
use tracing::{debug, warn};

use crate::config::PaginationSettings;
use crate::providers::normalizer::parse_timestamp;
use crate::providers::traits::MarketplaceResult;

/// Position in a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// First page, no cursor parameter
    Start,
    /// Opaque server token
    Token(String),
    /// Lower bound computed from the last page (e.g. last change date)
    Watermark(String),
    /// Number of items already consumed
    Offset(u64),
}

impl Cursor {
    /// Value to send upstream, `None` for the first page
    pub fn as_param(&self) -> Option<String> {
        match self {
            Cursor::Start => None,
            Cursor::Token(token) => Some(token.clone()),
            Cursor::Watermark(mark) => Some(mark.clone()),
            Cursor::Offset(offset) => Some(offset.to_string()),
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Cursor::Offset(offset) => *offset,
            _ => 0,
        }
    }

    /// Token cursor from a server response; empty tokens end the listing
    pub fn token(token: Option<&str>) -> Option<Cursor> {
        token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Cursor::Token(t.to_string()))
    }

    /// Watermark for the next page: the latest timestamp on this page.
    ///
    /// Returns `None` when the page has no parseable timestamp, or when that
    /// timestamp is not later than `prev` (the listing stopped moving).
    pub fn next_watermark<T, F>(items: &[T], extract: F, prev: &Cursor) -> Option<Cursor>
    where
        F: Fn(&T) -> Option<String>,
    {
        let (latest, raw) = items
            .iter()
            .filter_map(|item| {
                let raw = extract(item)?;
                parse_timestamp(&raw).map(|ts| (ts, raw))
            })
            .max_by_key(|(ts, _)| *ts)?;

        if let Cursor::Watermark(prev) = prev {
            if parse_timestamp(prev).is_some_and(|prev| latest <= prev) {
                debug!(watermark = %raw, "Watermark did not advance");
                return None;
            }
        }
        Some(Cursor::Watermark(raw))
    }

    /// Next offset; a short page means there is nothing after it
    pub fn next_offset(offset: u64, len: usize, page_size: usize) -> Option<Cursor> {
        if len == 0 || len < page_size {
            None
        } else {
            Some(Cursor::Offset(offset + len as u64))
        }
    }
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Zero-based page number within this run
    pub index: usize,
    /// Cursor the page was requested with
    pub cursor: Cursor,
    pub items: Vec<T>,
    /// Cursor offered by the upstream for the following page
    pub next: Option<Cursor>,
}

/// All pages of one run
#[derive(Debug, Clone)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pages: usize,
    /// `false` when the page bound cut the listing short
    pub exhausted: bool,
    /// Where to restart a listing that was cut short
    pub resume_from: Option<Cursor>,
}

struct State<F> {
    fetch: F,
    next: Option<Cursor>,
    index: usize,
    max_pages: usize,
}

/// Drives a paginated endpoint
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    max_pages: usize,
}

impl Paginator {
    pub fn new(max_pages: usize) -> Self {
        Paginator {
            max_pages: max_pages.max(1),
        }
    }

    pub fn from_settings(settings: &PaginationSettings) -> Self {
        Self::new(settings.max_pages)
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Lazy stream of pages starting at `start`.
    ///
    /// Nothing is fetched until the stream is polled; dropping it stops the
    /// listing after the page in progress.
    pub fn stream<T, F, Fut>(&self, start: Cursor, fetch: F) -> impl Stream<Item = MarketplaceResult<Page<T>>>
    where
        F: FnMut(Cursor) -> Fut,
        Fut: Future<Output = MarketplaceResult<(Vec<T>, Option<Cursor>)>>,
    {
        let state = State {
            fetch,
            next: Some(start),
            index: 0,
            max_pages: self.max_pages,
        };

        futures::stream::try_unfold(state, |mut state| async move {
            let Some(cursor) = state.next.take() else {
                return Ok(None);
            };

            if state.index >= state.max_pages {
                warn!(
                    pages = state.index,
                    cursor = ?cursor,
                    "Page bound reached before the listing was exhausted"
                );
                return Ok(None);
            }

            let (items, next) = (state.fetch)(cursor.clone()).await?;

            debug!(
                page = state.index,
                items = items.len(),
                has_next = next.is_some(),
                "Fetched page"
            );

            if next.as_ref() == Some(&cursor) && !items.is_empty() {
                warn!(page = state.index, cursor = ?cursor, "Cursor did not advance");
            }

            state.next = if items.is_empty() { None } else { next.clone() };

            let page = Page {
                index: state.index,
                cursor,
                items,
                next,
            };
            state.index += 1;

            Ok(Some((page, state)))
        })
    }

    /// Run the listing to the end (or the page bound) and gather all items
    pub async fn collect<T, F, Fut>(&self, start: Cursor, fetch: F) -> MarketplaceResult<Paged<T>>
    where
        F: FnMut(Cursor) -> Fut,
        Fut: Future<Output = MarketplaceResult<(Vec<T>, Option<Cursor>)>>,
    {
        let stream = self.stream(start, fetch);
        futures::pin_mut!(stream);

        let mut items = Vec::new();
        let mut pages = 0;
        let mut resume_from = None;

        while let Some(page) = stream.try_next().await? {
            pages += 1;
            resume_from = if page.items.is_empty() { None } else { page.next };
            items.extend(page.items);
        }

        Ok(Paged {
            items,
            pages,
            exhausted: resume_from.is_none(),
            resume_from,
        })
    }
}
