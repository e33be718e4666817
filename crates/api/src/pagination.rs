//! Cursor pagination over `{ items, nextPagePath }` responses.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Query for a single page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque continuation token from the previous page.
    pub cursor: Option<String>,
    pub limit: u32,
    /// Server-side lower bound on record time (`time` parameter), where supported.
    pub time_from: Option<String>,
    pub ticker: Option<String>,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_time_from(mut self, time_from: Option<DateTime<Utc>>) -> Self {
        self.time_from = time_from.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
        self
    }

    pub fn with_ticker(mut self, ticker: Option<String>) -> Self {
        self.ticker = ticker;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_path: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_path: Option<String>) -> Self {
        Self {
            items,
            next_page_path,
        }
    }

    /// Build the request for the page after this one.
    ///
    /// `cursor`, `limit` and `time` are taken from the query of `nextPagePath`,
    /// falling back to `current` for `limit` and `time`. Returns `None` when
    /// there is no next page or it carries no cursor.
    pub fn next_request(&self, current: &PageRequest) -> Option<PageRequest> {
        let path = self.next_page_path.as_deref()?.trim();
        if path.is_empty() {
            return None;
        }

        let query = path.split_once('?').map(|(_, q)| q).unwrap_or(path);
        let url = Url::parse(&format!("http://localhost/?{}", query)).ok()?;

        let mut next = PageRequest {
            cursor: None,
            ..current.clone()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "cursor" => next.cursor = Some(value.into_owned()),
                "limit" => {
                    if let Ok(limit) = value.parse() {
                        next.limit = limit;
                    }
                }
                "time" => next.time_from = Some(value.into_owned()),
                "ticker" => next.ticker = Some(value.into_owned()),
                _ => {}
            }
        }

        next.cursor.is_some().then_some(next)
    }
}

/// Page accounting for a cursor walk.
///
/// Caps the number of pages fetched and rejects a continuation that repeats
/// the cursor of the request that produced it.
#[derive(Debug, Clone)]
pub struct PageWalk {
    max_pages: usize,
    pages_fetched: usize,
}

impl PageWalk {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fails once `max_pages` pages have been fetched.
    pub fn check_budget(&self) -> Result<(), ApiError> {
        if self.pages_fetched >= self.max_pages {
            return Err(ApiError::Pagination(format!(
                "exceeded max pages ({})",
                self.max_pages
            )));
        }
        Ok(())
    }

    /// Count a successfully fetched page and return the running total.
    pub fn page_fetched(&mut self) -> usize {
        self.pages_fetched += 1;
        self.pages_fetched
    }

    /// The request to follow after `current`, or `None` when the walk is done.
    pub fn follow(
        &self,
        current: &PageRequest,
        next: Option<PageRequest>,
    ) -> Result<Option<PageRequest>, ApiError> {
        match next {
            Some(next) if next.cursor == current.cursor => Err(ApiError::Pagination(format!(
                "cursor {:?} returned twice in a row",
                next.cursor
            ))),
            next => Ok(next),
        }
    }
}

/// Fetch every page starting at `first` and return the concatenated items in order.
///
/// Stops at the first page without a continuation. The first error is
/// propagated and anything collected so far is dropped. `max_pages` guards
/// against a server that never stops paginating.
pub async fn drain_pages<T, F, Fut>(
    first: PageRequest,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<T>, ApiError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut all_items = Vec::new();
    let mut walk = PageWalk::new(max_pages);
    let mut request = first;

    loop {
        walk.check_budget()?;

        let page = fetch(request.clone()).await?;
        let page_number = walk.page_fetched();
        debug!(
            "Fetched page {} with {} items (cursor {:?})",
            page_number,
            page.items.len(),
            request.cursor
        );

        let next = page.next_request(&request);
        all_items.extend(page.items);

        match walk.follow(&request, next)? {
            Some(next) => request = next,
            None => break,
        }
    }

    Ok(all_items)
}
