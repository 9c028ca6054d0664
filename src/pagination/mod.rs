//! Cursor-based pagination for list operations.
//!
//! A [`Paginator`] walks `Start -> HasCursor -> ... -> Exhausted`, fetching one
//! page per [`Paginator::next_page`] call. Nothing is prefetched: a consumer
//! that stops pulling (or drops the paginator) causes no further requests.

use crate::errors::{AirtableError, AirtableResult, CancelledError, Stage};
use futures::future::BoxFuture;
use futures::{stream, Stream, TryStreamExt};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Opaque continuation token issued by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a server token; an empty token means there is no next page.
    pub(crate) fn from_server(token: Option<String>) -> Option<Self> {
        token.filter(|t| !t.is_empty()).map(Cursor)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// A page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    next: Option<Cursor>,
}

impl<T> Page<T> {
    /// Creates a new page from the server's continuation token.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next: Cursor::from_server(next_cursor),
        }
    }

    /// Returns true if there is a next page.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Returns the number of items in this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if this page is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maps the items in this page to a different type.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
        }
    }
}

/// Where a [`Paginator`] stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginatorState {
    /// No page fetched yet.
    Start,
    /// The last page carried a cursor.
    HasCursor(Cursor),
    /// No further pages.
    Exhausted,
    /// A page failed terminally.
    Failed,
}

/// Fetches the page after the given cursor (`None` for the first page).
pub type PageFetcher<T> =
    Box<dyn FnMut(Option<Cursor>) -> BoxFuture<'static, AirtableResult<Page<T>>> + Send>;

/// Lazy iterator over the pages of one list operation.
pub struct Paginator<T> {
    fetch: PageFetcher<T>,
    state: PaginatorState,
    max_items: Option<usize>,
    yielded: usize,
    pages: usize,
    cancel: Option<CancellationToken>,
}

impl<T: Send + 'static> Paginator<T> {
    /// Creates a new paginator.
    pub fn new(fetch: PageFetcher<T>) -> Self {
        Self {
            fetch,
            state: PaginatorState::Start,
            max_items: None,
            yielded: 0,
            pages: 0,
            cancel: None,
        }
    }

    /// Stops after `max` items in total, truncating the last page.
    pub fn with_max_items(mut self, max: Option<usize>) -> Self {
        self.max_items = max;
        self
    }

    /// Fails the next fetch once `token` is cancelled.
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Current state.
    pub fn state(&self) -> &PaginatorState {
        &self.state
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Returns true if another call to [`next_page`](Self::next_page) may
    /// fetch a page.
    pub fn has_next(&self) -> bool {
        matches!(
            self.state,
            PaginatorState::Start | PaginatorState::HasCursor(_)
        )
    }

    /// Fetches the next page, or returns `None` once exhausted.
    ///
    /// A failed page is returned tagged with [`Stage::Pagination`]; the
    /// paginator then stays failed and yields nothing further.
    pub async fn next_page(&mut self) -> AirtableResult<Option<Page<T>>> {
        let cursor = match &self.state {
            PaginatorState::Exhausted | PaginatorState::Failed => return Ok(None),
            PaginatorState::Start => None,
            PaginatorState::HasCursor(cursor) => Some(cursor.clone()),
        };

        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.state = PaginatorState::Failed;
            return Err(AirtableError::Cancelled(CancelledError::Token).at_stage(Stage::Pagination));
        }

        let mut page = match (self.fetch)(cursor).await {
            Ok(page) => page,
            Err(error) => {
                self.state = PaginatorState::Failed;
                return Err(error.at_stage(Stage::Pagination));
            }
        };
        self.pages += 1;

        let mut limit_reached = false;
        if let Some(max) = self.max_items {
            let remaining = max.saturating_sub(self.yielded);
            if page.items.len() >= remaining {
                page.items.truncate(remaining);
                limit_reached = true;
            }
        }
        self.yielded += page.items.len();

        self.state = match (&page.next, limit_reached) {
            (Some(next), false) => PaginatorState::HasCursor(next.clone()),
            _ => PaginatorState::Exhausted,
        };

        debug!(
            page = self.pages,
            items = page.items.len(),
            has_next = self.has_next(),
            "Fetched page"
        );

        Ok(Some(page))
    }

    /// Collects all remaining items from all pages.
    pub async fn collect_all(&mut self) -> AirtableResult<Vec<T>> {
        let mut all_items = Vec::new();

        while let Some(page) = self.next_page().await? {
            all_items.extend(page.items);
        }

        Ok(all_items)
    }

    /// Converts into a stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = AirtableResult<Page<T>>> + Send {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, AirtableError>(page.map(|page| (page, paginator)))
        })
    }

    /// Converts into a stream of individual items across pages.
    pub fn into_items(self) -> impl Stream<Item = AirtableResult<T>> + Send {
        self.into_stream()
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok)))
            .try_flatten()
    }
}

impl<T> fmt::Debug for Paginator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("state", &self.state)
            .field("pages", &self.pages)
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}
