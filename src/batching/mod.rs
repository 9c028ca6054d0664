//! Splitting multi-record operations into request-sized chunks.
//!
//! The [`Batcher`] cuts the input into contiguous chunks of at most
//! `max_batch_size` items, dispatches them with bounded concurrency, and
//! reassembles the per-item outcomes in input order. A chunk that fails only
//! fails its own items.

use crate::config::BatchConfig;
use crate::errors::{AirtableError, AirtableResult, ResponseError};
use futures::{stream, StreamExt};
use std::future::Future;
use std::ops::Index;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome for a single input item. Errors are shared by every item of the
/// chunk they came from.
pub type ItemOutcome<T> = Result<T, Arc<AirtableError>>;

/// A contiguous slice of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<I> {
    /// Position of this chunk among all chunks.
    pub index: usize,
    /// Input position of the first item.
    pub offset: usize,
    /// Items of this chunk.
    pub items: Vec<I>,
}

impl<I> Chunk<I> {
    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the chunk has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into contiguous chunks of at most `size` items.
pub fn split<I>(items: Vec<I>, size: usize) -> Vec<Chunk<I>> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut iter = items.into_iter().peekable();
    let mut offset = 0;

    while iter.peek().is_some() {
        let items: Vec<I> = iter.by_ref().take(size).collect();
        let len = items.len();
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            items,
        });
        offset += len;
    }

    chunks
}

/// Per-item outcomes of a batch operation, aligned with the input.
#[derive(Debug)]
pub struct AggregatedResult<T> {
    outcomes: Vec<ItemOutcome<T>>,
}

impl<T> AggregatedResult<T> {
    /// Wraps already aligned outcomes.
    pub fn new(outcomes: Vec<ItemOutcome<T>>) -> Self {
        Self { outcomes }
    }

    /// Number of outcomes, equal to the number of input items.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if there are no outcomes.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome of input item `index`.
    pub fn get(&self, index: usize) -> Option<&ItemOutcome<T>> {
        self.outcomes.get(index)
    }

    /// Iterates over outcomes in input order.
    pub fn iter(&self) -> std::slice::Iter<'_, ItemOutcome<T>> {
        self.outcomes.iter()
    }

    /// Successful items with their input positions.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().ok().map(|v| (i, v)))
    }

    /// Failed items with their input positions.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Arc<AirtableError>)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
    }

    /// Number of failed items.
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }

    /// Returns true if every item succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// Returns the outcomes.
    pub fn into_outcomes(self) -> Vec<ItemOutcome<T>> {
        self.outcomes
    }

    /// All values, or the first error in input order.
    pub fn into_result(self) -> Result<Vec<T>, Arc<AirtableError>> {
        self.outcomes.into_iter().collect()
    }
}

impl<T> Index<usize> for AggregatedResult<T> {
    type Output = ItemOutcome<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.outcomes[index]
    }
}

impl<T> IntoIterator for AggregatedResult<T> {
    type Item = ItemOutcome<T>;
    type IntoIter = std::vec::IntoIter<ItemOutcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Chunked dispatcher for multi-record operations.
#[derive(Debug, Clone, Default)]
pub struct Batcher {
    config: BatchConfig,
}

impl Batcher {
    /// Creates a new batcher.
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Returns the batch configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs `per_chunk` once per chunk of `items` and merges the results.
    ///
    /// `per_chunk` returns one outcome per chunk item, in chunk order. A chunk
    /// error, or a result count that does not match the chunk, is attached to
    /// every item of that chunk. Empty input dispatches nothing.
    pub async fn execute<I, T, F, Fut>(&self, items: Vec<I>, mut per_chunk: F) -> AggregatedResult<T>
    where
        F: FnMut(Chunk<I>) -> Fut,
        Fut: Future<Output = AirtableResult<Vec<ItemOutcome<T>>>>,
    {
        let total = items.len();
        if total == 0 {
            return AggregatedResult::new(Vec::new());
        }

        let chunks = split(items, self.config.max_batch_size);
        debug!(
            items = total,
            chunks = chunks.len(),
            concurrency = self.config.max_concurrency,
            "Dispatching batch"
        );

        let completed: Vec<_> = stream::iter(chunks.into_iter().map(|chunk| {
            let (index, offset, len) = (chunk.index, chunk.offset, chunk.len());
            let fut = per_chunk(chunk);
            async move { (index, offset, len, fut.await) }
        }))
        .buffer_unordered(self.config.max_concurrency.max(1))
        .collect()
        .await;

        let mut slots: Vec<Option<ItemOutcome<T>>> = (0..total).map(|_| None).collect();

        for (index, offset, len, result) in completed {
            let outcomes = match result {
                Ok(outcomes) if outcomes.len() == len => outcomes,
                Ok(outcomes) => {
                    let error = Arc::new(AirtableError::Response(ResponseError::UnexpectedFormat(
                        format!("expected {} results for chunk, got {}", len, outcomes.len()),
                    )));
                    warn!(chunk = index, error = %error, "Chunk result count mismatch");
                    (0..len).map(|_| Err(error.clone())).collect()
                }
                Err(error) => {
                    warn!(chunk = index, offset, items = len, error = %error, "Chunk failed");
                    let error = Arc::new(error);
                    (0..len).map(|_| Err(error.clone())).collect()
                }
            };

            for (slot, outcome) in slots[offset..offset + len].iter_mut().zip(outcomes) {
                *slot = Some(outcome);
            }
        }

        let outcomes = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Arc::new(AirtableError::Response(
                        ResponseError::UnexpectedFormat("no result for item".to_string()),
                    )))
                })
            })
            .collect();

        AggregatedResult::new(outcomes)
    }
}
