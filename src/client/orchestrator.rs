//! Request orchestrator with admission, retry, batching and pagination.
//!
//! Every HTTP exchange goes through [`RequestOrchestrator::exchange`], which:
//! - waits for a slot in the base's rate window
//! - attaches authentication and sends the request with a deadline
//! - maps non-2xx responses to domain errors
//! - consults the retry policy and sleeps before the next attempt
//!
//! Cancellation (caller token or operation timeout) interrupts any of these
//! suspension points.

use crate::auth::AuthProvider;
use crate::batching::{AggregatedResult, Batcher, Chunk, ItemOutcome};
use crate::config::{AirtableConfig, MAX_PAGE_SIZE, MAX_URL_LENGTH};
use crate::errors::{
    AirtableError, AirtableResult, AuthenticationError, CancelledError, NotFoundError,
    RateLimitError, ResponseError, ServerError, Stage, ValidationError,
};
use crate::observability::Metrics;
use crate::pagination::{Cursor, Page, PageFetcher, Paginator};
use crate::resilience::{DefaultRetryPolicy, RateLimiter, RetryDecision, RetryPolicy};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::types::wire::{
    comments_query, list_query, CommentRequest, CommentsResponse, CreateRecordsRequest,
    DeleteRecordsResponse, ErrorResponse, ListRecordsBody, ListRecordsResponse, NewRecord,
    PerformUpsert, RecordsResponse, SingleRecordRequest, UpdateRecord, UpdateRecordsRequest,
    UpsertResponse,
};
use crate::types::{
    validate_record_id, Comment, DeletedComment, DeletedRecord, Fields, ListParams, Record,
    RecordId, RecordUpdate, UpsertOptions, UpsertRecord, UpsertedRecord, WriteOptions,
};
use bytes::Bytes;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// A table inside a base.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    base_id: String,
    table: String,
}

impl TableRef {
    /// Creates a reference from a base id and a table name or id.
    pub fn new(base_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into(),
            table: table.into(),
        }
    }

    /// Base id; also the rate limiting key.
    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// Table name or id.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn validate(&self) -> AirtableResult<()> {
        if self.base_id.trim().is_empty() {
            return Err(AirtableError::invalid_parameter("base id is empty"));
        }
        if self.table.trim().is_empty() {
            return Err(AirtableError::invalid_parameter("table name is empty"));
        }
        Ok(())
    }
}

/// Per-call controls.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Stops the operation when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Deadline for each exchange, overriding the configured timeout.
    pub timeout: Option<Duration>,
    /// Deadline for the whole operation, retries and waits included.
    pub operation_timeout: Option<Duration>,
}

impl CallOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the operation with `token`.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets the per-exchange deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the operation deadline.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// One attempt at a request, built fresh for every try.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// HTTP method.
    pub method: HttpMethod,
    /// Target URL.
    pub url: Url,
    /// Encoded request body.
    pub payload: Option<Bytes>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Time since the operation started.
    pub elapsed: Duration,
    /// Deadline for this exchange.
    pub timeout: Duration,
}

/// A logical operation on a table.
#[derive(Debug, Clone)]
pub enum Operation {
    /// List records, following every page.
    List(ListParams),
    /// Create records.
    CreateMany(Vec<Fields>),
    /// Update records by id.
    UpdateMany(Vec<RecordUpdate>),
    /// Create or update records matched on merge fields.
    UpsertMany(Vec<UpsertRecord>, UpsertOptions),
    /// Delete records by id.
    DeleteMany(Vec<RecordId>),
}

/// Result of [`RequestOrchestrator::execute`].
#[derive(Debug)]
pub enum OperationOutput {
    /// Listed records.
    Records(Vec<Record>),
    /// Created records, aligned with the input.
    Created(AggregatedResult<Record>),
    /// Updated records, aligned with the input.
    Updated(AggregatedResult<Record>),
    /// Upserted records, aligned with the input.
    Upserted(AggregatedResult<UpsertedRecord>),
    /// Deleted records, aligned with the input.
    Deleted(AggregatedResult<DeletedRecord>),
}

#[derive(Debug, Clone)]
struct OperationContext {
    started: Instant,
    cancel: Option<CancellationToken>,
    exchange_timeout: Duration,
    operation_timeout: Option<Duration>,
}

impl OperationContext {
    fn new(options: &CallOptions, default_timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            cancel: options.cancel.clone(),
            exchange_timeout: options.timeout.unwrap_or(default_timeout),
            operation_timeout: options.operation_timeout,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.operation_timeout.map(|t| self.started + t)
    }

    fn check(&self) -> AirtableResult<()> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(CancelledError::Token.into());
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline(), self.operation_timeout) {
            if Instant::now() >= deadline {
                return Err(CancelledError::OperationTimeout(timeout).into());
            }
        }
        Ok(())
    }

    /// Resolves when the caller cancels or the operation deadline passes.
    async fn interrupted(&self) -> AirtableError {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline() {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => CancelledError::Token.into(),
            _ = expired => {
                CancelledError::OperationTimeout(self.operation_timeout.unwrap_or_default()).into()
            }
        }
    }
}

struct Inner {
    config: AirtableConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    limiter: RateLimiter,
    policy: Arc<dyn RetryPolicy>,
    batcher: Batcher,
    metrics: Arc<Metrics>,
}

/// Turns logical operations into paced, chunked, retried exchanges.
///
/// Cheap to clone; clones share the rate windows and metrics.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

impl RequestOrchestrator {
    /// Creates an orchestrator with the default retry policy.
    pub fn new(config: AirtableConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = Arc::new(DefaultRetryPolicy::new(config.retry.clone()));
        Self::with_policy(config, transport, policy)
    }

    /// Creates an orchestrator with a custom retry policy.
    pub fn with_policy(
        config: AirtableConfig,
        transport: Arc<dyn HttpTransport>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let auth = config.auth_provider.clone();
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let batcher = Batcher::new(config.batch.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                auth,
                limiter,
                policy,
                batcher,
                metrics: Arc::new(Metrics::new()),
            }),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &AirtableConfig {
        &self.inner.config
    }

    /// Gets the metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Gets the rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    fn context(&self, options: &CallOptions) -> OperationContext {
        OperationContext::new(options, self.inner.config.timeout)
    }

    /// Builds `{base_url}/{base}/{table}/{extra...}`.
    fn table_url(&self, table: &TableRef, extra: &[&str]) -> AirtableResult<Url> {
        let mut url = self.inner.config.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AirtableError::configuration("Base URL cannot hold a path"))?;
            segments
                .pop_if_empty()
                .push(&table.base_id)
                .push(&table.table)
                .extend(extra);
        }
        Ok(url)
    }

    /// Runs a logical operation.
    pub async fn execute(
        &self,
        table: &TableRef,
        operation: Operation,
        options: &CallOptions,
    ) -> AirtableResult<OperationOutput> {
        let write = WriteOptions::default();
        match operation {
            Operation::List(params) => self
                .all(table, params, options)
                .await
                .map(OperationOutput::Records),
            Operation::CreateMany(records) => self
                .create_many(table, records, write, options)
                .await
                .map(OperationOutput::Created),
            Operation::UpdateMany(updates) => self
                .update_many(table, updates, write, options)
                .await
                .map(OperationOutput::Updated),
            Operation::UpsertMany(records, upsert) => self
                .upsert_many(table, records, upsert, options)
                .await
                .map(OperationOutput::Upserted),
            Operation::DeleteMany(ids) => self
                .delete_many(table, ids, options)
                .await
                .map(OperationOutput::Deleted),
        }
    }

    /// Lists records lazily, one page per [`Paginator::next_page`] call.
    pub fn list(
        &self,
        table: &TableRef,
        params: ListParams,
        options: &CallOptions,
    ) -> AirtableResult<Paginator<Record>> {
        table
            .validate()
            .and_then(|_| params.validate())
            .map_err(|e| e.at_stage(Stage::Pagination))?;

        let ctx = self.context(options);
        let max_items = params.max_records.map(|m| m as usize);
        let orchestrator = self.clone();
        let table = table.clone();
        let params = Arc::new(params);

        let fetch: PageFetcher<Record> = Box::new(move |cursor: Option<Cursor>| {
            let orchestrator = orchestrator.clone();
            let table = table.clone();
            let params = params.clone();
            let ctx = ctx.clone();
            async move { orchestrator.fetch_page(&table, &params, cursor, &ctx).await }.boxed()
        });

        Ok(Paginator::new(fetch)
            .with_max_items(max_items)
            .with_cancellation(options.cancel.clone()))
    }

    /// Lists every matching record.
    pub async fn all(
        &self,
        table: &TableRef,
        params: ListParams,
        options: &CallOptions,
    ) -> AirtableResult<Vec<Record>> {
        self.list(table, params, options)?.collect_all().await
    }

    /// Returns the first matching record, if any.
    pub async fn first(
        &self,
        table: &TableRef,
        params: ListParams,
        options: &CallOptions,
    ) -> AirtableResult<Option<Record>> {
        let mut pages = self.list(table, params.page_size(1).max_records(1), options)?;
        Ok(pages
            .next_page()
            .await?
            .and_then(|page| page.items.into_iter().next()))
    }

    async fn fetch_page(
        &self,
        table: &TableRef,
        params: &ListParams,
        cursor: Option<Cursor>,
        ctx: &OperationContext,
    ) -> AirtableResult<Page<Record>> {
        let offset = cursor.as_ref().map(Cursor::as_str);
        let mut url = self.table_url(table, &[])?;
        let query = list_query(params, offset);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        let response = if url.as_str().len() > MAX_URL_LENGTH {
            debug!(
                url_len = url.as_str().len(),
                "List URL too long, sending POST listRecords"
            );
            let url = self.table_url(table, &["listRecords"])?;
            let body = encode(&ListRecordsBody::new(params, offset))?;
            self.exchange(&table.base_id, HttpMethod::Post, url, Some(body), ctx)
                .await?
        } else {
            self.exchange(&table.base_id, HttpMethod::Get, url, None, ctx)
                .await?
        };

        let list: ListRecordsResponse = decode(&response)?;
        self.inner.metrics.record_page();
        Ok(Page::new(list.records, list.offset))
    }

    /// Fetches one record by id.
    #[instrument(skip(self, table, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn get(
        &self,
        table: &TableRef,
        record_id: &str,
        options: &CallOptions,
    ) -> AirtableResult<Record> {
        table.validate()?;
        validate_record_id(record_id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[record_id])?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Get, url, None, &ctx)
            .await
            .map_err(|e| not_found_as_record(e, record_id))?;
        decode(&response)
    }

    /// Creates one record.
    #[instrument(skip(self, table, fields, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn create(
        &self,
        table: &TableRef,
        fields: Fields,
        write: WriteOptions,
        options: &CallOptions,
    ) -> AirtableResult<Record> {
        table.validate()?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[])?;
        let body = encode(&CreateRecordsRequest {
            records: vec![NewRecord { fields: &fields }],
            typecast: write.typecast,
            return_fields_by_field_id: write.return_fields_by_field_id,
        })?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Post, url, Some(body), &ctx)
            .await?;
        let created: RecordsResponse = decode(&response)?;
        created.records.into_iter().next().ok_or_else(|| {
            AirtableError::Response(ResponseError::UnexpectedFormat(
                "create returned no record".to_string(),
            ))
        })
    }

    /// Updates one record.
    #[instrument(skip(self, table, update, options), fields(base = %table.base_id, table = %table.table, record = %update.id))]
    pub async fn update(
        &self,
        table: &TableRef,
        update: RecordUpdate,
        write: WriteOptions,
        options: &CallOptions,
    ) -> AirtableResult<Record> {
        table.validate()?;
        validate_record_id(&update.id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[update.id.as_str()])?;
        let body = encode(&SingleRecordRequest {
            fields: &update.fields,
            typecast: write.typecast,
            return_fields_by_field_id: write.return_fields_by_field_id,
        })?;

        let response = self
            .exchange(&table.base_id, write_method(write), url, Some(body), &ctx)
            .await
            .map_err(|e| not_found_as_record(e, &update.id))?;
        decode(&response)
    }

    /// Deletes one record.
    #[instrument(skip(self, table, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn delete(
        &self,
        table: &TableRef,
        record_id: &str,
        options: &CallOptions,
    ) -> AirtableResult<DeletedRecord> {
        table.validate()?;
        validate_record_id(record_id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[record_id])?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Delete, url, None, &ctx)
            .await
            .map_err(|e| not_found_as_record(e, record_id))?;
        decode(&response)
    }

    /// Creates records in chunks.
    #[instrument(skip(self, table, records, options), fields(base = %table.base_id, table = %table.table, count = records.len()))]
    pub async fn create_many(
        &self,
        table: &TableRef,
        records: Vec<Fields>,
        write: WriteOptions,
        options: &CallOptions,
    ) -> AirtableResult<AggregatedResult<Record>> {
        table.validate().map_err(|e| e.at_stage(Stage::Batching))?;
        let ctx = &self.context(options);
        let url = &self.table_url(table, &[])?;

        let result = self
            .inner
            .batcher
            .execute(records, move |chunk: Chunk<Fields>| async move {
                self.inner.metrics.record_chunk();
                let body = encode(&CreateRecordsRequest {
                    records: chunk.items.iter().map(|fields| NewRecord { fields }).collect(),
                    typecast: write.typecast,
                    return_fields_by_field_id: write.return_fields_by_field_id,
                })?;
                let response = self
                    .exchange(&table.base_id, HttpMethod::Post, url.clone(), Some(body), ctx)
                    .await?;
                let created: RecordsResponse = decode(&response)?;
                Ok::<_, AirtableError>(created.records.into_iter().map(Ok).collect::<Vec<ItemOutcome<Record>>>())
            })
            .await;

        Ok(result)
    }

    /// Updates records in chunks.
    #[instrument(skip(self, table, updates, options), fields(base = %table.base_id, table = %table.table, count = updates.len()))]
    pub async fn update_many(
        &self,
        table: &TableRef,
        updates: Vec<RecordUpdate>,
        write: WriteOptions,
        options: &CallOptions,
    ) -> AirtableResult<AggregatedResult<Record>> {
        table
            .validate()
            .and_then(|_| validate_ids(updates.iter().map(|u| u.id.as_str())))
            .map_err(|e| e.at_stage(Stage::Batching))?;
        let ctx = &self.context(options);
        let url = &self.table_url(table, &[])?;
        let method = write_method(write);

        let result = self
            .inner
            .batcher
            .execute(updates, move |chunk: Chunk<RecordUpdate>| async move {
                self.inner.metrics.record_chunk();
                let body = encode(&UpdateRecordsRequest {
                    records: chunk
                        .items
                        .iter()
                        .map(|u| UpdateRecord {
                            id: Some(&u.id),
                            fields: &u.fields,
                        })
                        .collect(),
                    typecast: write.typecast,
                    return_fields_by_field_id: write.return_fields_by_field_id,
                    perform_upsert: None,
                })?;
                let response = self
                    .exchange(&table.base_id, method, url.clone(), Some(body), ctx)
                    .await?;
                let updated: RecordsResponse = decode(&response)?;
                Ok::<_, AirtableError>(updated.records.into_iter().map(Ok).collect::<Vec<ItemOutcome<Record>>>())
            })
            .await;

        Ok(result)
    }

    /// Creates or updates records matched on `upsert.fields_to_merge_on`.
    #[instrument(skip(self, table, records, upsert, options), fields(base = %table.base_id, table = %table.table, count = records.len()))]
    pub async fn upsert_many(
        &self,
        table: &TableRef,
        records: Vec<UpsertRecord>,
        upsert: UpsertOptions,
        options: &CallOptions,
    ) -> AirtableResult<AggregatedResult<UpsertedRecord>> {
        table
            .validate()
            .and_then(|_| {
                if upsert.fields_to_merge_on.is_empty() {
                    return Err(AirtableError::invalid_parameter(
                        "upsert needs at least one field to merge on",
                    ));
                }
                validate_ids(records.iter().filter_map(|r| r.id.as_deref()))
            })
            .map_err(|e| e.at_stage(Stage::Batching))?;
        let ctx = &self.context(options);
        let url = &self.table_url(table, &[])?;
        let upsert = &upsert;
        let method = write_method(upsert.write);

        let result = self
            .inner
            .batcher
            .execute(records, move |chunk: Chunk<UpsertRecord>| async move {
                self.inner.metrics.record_chunk();
                let body = encode(&UpdateRecordsRequest {
                    records: chunk.items.iter().map(UpdateRecord::from).collect(),
                    typecast: upsert.write.typecast,
                    return_fields_by_field_id: upsert.write.return_fields_by_field_id,
                    perform_upsert: Some(PerformUpsert {
                        fields_to_merge_on: &upsert.fields_to_merge_on,
                    }),
                })?;
                let response = self
                    .exchange(&table.base_id, method, url.clone(), Some(body), ctx)
                    .await?;
                let UpsertResponse {
                    records,
                    created_records,
                    ..
                } = decode(&response)?;
                let created: HashSet<RecordId> = created_records.into_iter().collect();
                let outcomes: Vec<ItemOutcome<UpsertedRecord>> = records
                    .into_iter()
                    .map(|record| {
                        let created = created.contains(&record.id);
                        Ok(UpsertedRecord { record, created })
                    })
                    .collect();
                Ok::<_, AirtableError>(outcomes)
            })
            .await;

        Ok(result)
    }

    /// Deletes records in chunks.
    ///
    /// Ids the API does not report as deleted fail with a record-level
    /// not found error. When a whole chunk is rejected as not found, its ids
    /// are re-sent one at a time so only the missing ones fail.
    #[instrument(skip(self, table, ids, options), fields(base = %table.base_id, table = %table.table, count = ids.len()))]
    pub async fn delete_many(
        &self,
        table: &TableRef,
        ids: Vec<RecordId>,
        options: &CallOptions,
    ) -> AirtableResult<AggregatedResult<DeletedRecord>> {
        table
            .validate()
            .and_then(|_| validate_ids(ids.iter().map(String::as_str)))
            .map_err(|e| e.at_stage(Stage::Batching))?;
        let ctx = &self.context(options);

        let result = self
            .inner
            .batcher
            .execute(ids, move |chunk: Chunk<RecordId>| async move {
                self.inner.metrics.record_chunk();
                match self.delete_chunk(table, &chunk.items, ctx).await {
                    Err(error) if is_record_not_found(&error) && chunk.len() > 1 => {
                        debug!(
                            chunk = chunk.index,
                            items = chunk.len(),
                            "Chunk rejected as not found, deleting ids one by one"
                        );
                        let mut outcomes = Vec::with_capacity(chunk.len());
                        for id in &chunk.items {
                            let outcome = match self
                                .delete_chunk(table, std::slice::from_ref(id), ctx)
                                .await
                            {
                                Ok(mut single) => single.pop().unwrap_or_else(|| {
                                    Err(Arc::new(AirtableError::record_not_found(id)))
                                }),
                                Err(error) => Err(Arc::new(not_found_as_record(error, id))),
                            };
                            outcomes.push(outcome);
                        }
                        Ok(outcomes)
                    }
                    Err(error) => match chunk.items.as_slice() {
                        [id] => Err(not_found_as_record(error, id)),
                        _ => Err(error),
                    },
                    ok => ok,
                }
            })
            .await;

        Ok(result)
    }

    async fn delete_chunk(
        &self,
        table: &TableRef,
        ids: &[RecordId],
        ctx: &OperationContext,
    ) -> AirtableResult<Vec<ItemOutcome<DeletedRecord>>> {
        let mut url = self.table_url(table, &[])?;
        {
            let mut query = url.query_pairs_mut();
            for id in ids {
                query.append_pair("records[]", id);
            }
        }

        let response = self
            .exchange(&table.base_id, HttpMethod::Delete, url, None, ctx)
            .await?;
        let deleted: DeleteRecordsResponse = decode(&response)?;
        let by_id: HashMap<&str, &DeletedRecord> = deleted
            .records
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();

        Ok(ids
            .iter()
            .map(|id| match by_id.get(id.as_str()) {
                Some(record) if record.deleted => Ok((*record).clone()),
                _ => Err(Arc::new(AirtableError::record_not_found(id))),
            })
            .collect())
    }

    // Record comments

    /// Lists the comments of a record lazily, newest first.
    ///
    /// `page_size` is capped by the API at 100.
    pub fn comments(
        &self,
        table: &TableRef,
        record_id: &str,
        page_size: Option<u32>,
        options: &CallOptions,
    ) -> AirtableResult<Paginator<Comment>> {
        table
            .validate()
            .and_then(|_| validate_record_id(record_id).map_err(AirtableError::from))
            .and_then(|_| match page_size {
                Some(size) if size == 0 || size > MAX_PAGE_SIZE => {
                    Err(AirtableError::invalid_parameter(format!(
                        "page size must be between 1 and {}",
                        MAX_PAGE_SIZE
                    )))
                }
                _ => Ok(()),
            })
            .map_err(|e| e.at_stage(Stage::Pagination))?;

        let ctx = self.context(options);
        let orchestrator = self.clone();
        let table = table.clone();
        let record_id: Arc<str> = Arc::from(record_id);

        let fetch: PageFetcher<Comment> = Box::new(move |cursor: Option<Cursor>| {
            let orchestrator = orchestrator.clone();
            let table = table.clone();
            let record_id = record_id.clone();
            let ctx = ctx.clone();
            async move {
                let mut url = orchestrator.table_url(&table, &[&*record_id, "comments"])?;
                let query = comments_query(page_size, cursor.as_ref().map(Cursor::as_str));
                if !query.is_empty() {
                    url.query_pairs_mut().extend_pairs(query.iter());
                }
                let response = orchestrator
                    .exchange(&table.base_id, HttpMethod::Get, url, None, &ctx)
                    .await
                    .map_err(|e| not_found_as_record(e, &record_id))?;
                let page: CommentsResponse = decode(&response)?;
                orchestrator.inner.metrics.record_page();
                Ok(Page::new(page.comments, page.offset))
            }
            .boxed()
        });

        Ok(Paginator::new(fetch).with_cancellation(options.cancel.clone()))
    }

    /// Adds a comment to a record.
    #[instrument(skip(self, table, text, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn add_comment(
        &self,
        table: &TableRef,
        record_id: &str,
        text: &str,
        options: &CallOptions,
    ) -> AirtableResult<Comment> {
        table.validate()?;
        validate_record_id(record_id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[record_id, "comments"])?;
        let body = encode(&CommentRequest { text })?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Post, url, Some(body), &ctx)
            .await
            .map_err(|e| not_found_as_record(e, record_id))?;
        decode(&response)
    }

    /// Replaces the text of a comment.
    #[instrument(skip(self, table, text, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn update_comment(
        &self,
        table: &TableRef,
        record_id: &str,
        comment_id: &str,
        text: &str,
        options: &CallOptions,
    ) -> AirtableResult<Comment> {
        table.validate()?;
        validate_record_id(record_id)?;
        validate_record_id(comment_id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[record_id, "comments", comment_id])?;
        let body = encode(&CommentRequest { text })?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Patch, url, Some(body), &ctx)
            .await?;
        decode(&response)
    }

    /// Deletes a comment.
    #[instrument(skip(self, table, options), fields(base = %table.base_id, table = %table.table))]
    pub async fn delete_comment(
        &self,
        table: &TableRef,
        record_id: &str,
        comment_id: &str,
        options: &CallOptions,
    ) -> AirtableResult<DeletedComment> {
        table.validate()?;
        validate_record_id(record_id)?;
        validate_record_id(comment_id)?;
        let ctx = self.context(options);
        let url = self.table_url(table, &[record_id, "comments", comment_id])?;

        let response = self
            .exchange(&table.base_id, HttpMethod::Delete, url, None, &ctx)
            .await?;
        decode(&response)
    }

    /// Sends one logical request, gated by admission and the retry policy.
    ///
    /// Returns the first 2xx response, or the last error once the policy
    /// gives up.
    async fn exchange(
        &self,
        base_id: &str,
        method: HttpMethod,
        url: Url,
        payload: Option<Bytes>,
        ctx: &OperationContext,
    ) -> AirtableResult<HttpResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.check()?;

            let admission = tokio::select! {
                biased;
                error = ctx.interrupted() => return Err(error.at_stage(Stage::Admission)),
                admission = self.inner.limiter.admit(base_id) => admission,
            };
            if !admission.waited.is_zero() {
                self.inner.metrics.record_rate_limit_wait();
            }

            let exchange = Exchange {
                method,
                url: url.clone(),
                payload: payload.clone(),
                attempt,
                elapsed: ctx.started.elapsed(),
                timeout: ctx.exchange_timeout,
            };

            let result = tokio::select! {
                biased;
                error = ctx.interrupted() => return Err(error),
                result = self.send(&exchange) => result,
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            // The ceiling holds whatever the policy decides.
            let decision = if attempt >= self.inner.policy.max_attempts() {
                RetryDecision::GiveUp
            } else {
                self.inner.policy.should_retry(&error, attempt)
            };

            match decision {
                RetryDecision::Retry(delay) => {
                    self.inner.metrics.record_retry();
                    warn!(
                        base = base_id,
                        method = method.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::select! {
                        biased;
                        error = ctx.interrupted() => return Err(error),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    self.inner.metrics.record_failure();
                    debug!(
                        base = base_id,
                        attempt,
                        retryable = error.is_retryable(),
                        error = %error,
                        "Request failed permanently"
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn send(&self, exchange: &Exchange) -> AirtableResult<HttpResponse> {
        let authorization = self.inner.auth.authorization().await?;
        let mut auth_value = HeaderValue::from_str(authorization.expose_secret()).map_err(|_| {
            AuthenticationError::MissingToken("token is not a valid header value".to_string())
        })?;
        auth_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.inner.config.user_agent)
                .map_err(|e| AirtableError::configuration(format!("Invalid user agent: {}", e)))?,
        );
        if exchange.payload.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let request = HttpRequest {
            method: exchange.method,
            url: exchange.url.clone(),
            headers,
            body: exchange.payload.clone(),
            timeout: Some(exchange.timeout),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(exchange.timeout, self.inner.transport.send(request)).await;
        self.inner.metrics.record_exchange(started.elapsed());

        let response = outcome.map_err(|_| {
            AirtableError::timeout(format!("no response within {:?}", exchange.timeout))
        })??;

        debug!(
            method = exchange.method.as_str(),
            path = exchange.url.path(),
            attempt = exchange.attempt,
            status = response.status.as_u16(),
            "Exchange completed"
        );

        if response.status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(&response))
        }
    }
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("config", &self.inner.config)
            .field("limiter", &self.inner.limiter)
            .finish_non_exhaustive()
    }
}

fn write_method(write: WriteOptions) -> HttpMethod {
    if write.replace {
        HttpMethod::Put
    } else {
        HttpMethod::Patch
    }
}

fn validate_ids<'a>(ids: impl Iterator<Item = &'a str>) -> AirtableResult<()> {
    for id in ids {
        validate_record_id(id)?;
    }
    Ok(())
}

fn encode<T: Serialize>(body: &T) -> AirtableResult<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| AirtableError::invalid_parameter(format!("Failed to serialize request: {}", e)))
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> AirtableResult<T> {
    serde_json::from_slice(&response.body).map_err(|e| {
        AirtableError::deserialization(format!("Failed to deserialize response: {}", e))
    })
}

fn is_record_not_found(error: &AirtableError) -> bool {
    matches!(error.root(), AirtableError::NotFound(not_found) if not_found.is_record())
}

/// Narrows a record-level 404 on a record URL to [`NotFoundError::Record`].
///
/// A missing table or base keeps the API's error.
fn not_found_as_record(error: AirtableError, record_id: &str) -> AirtableError {
    if is_record_not_found(&error) {
        AirtableError::record_not_found(record_id)
    } else {
        error
    }
}

/// Maps a non-2xx response to a domain error.
pub(crate) fn error_from_response(response: &HttpResponse) -> AirtableError {
    let status = response.status.as_u16();
    let detail = serde_json::from_slice::<ErrorResponse>(&response.body)
        .ok()
        .map(|e| e.error);

    let error_type = detail.as_ref().map(|d| d.error_type().to_string());
    let message = match &detail {
        Some(detail) => detail.message().to_string(),
        None if !response.body.is_empty() => String::from_utf8_lossy(&response.body).into_owned(),
        None => response
            .status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
    };
    let retry_after = response.retry_after();

    match status {
        400 | 413 | 422 => ValidationError::Rejected {
            status,
            error_type,
            message,
        }
        .into(),
        401 => AuthenticationError::InvalidToken(message).into(),
        403 => AuthenticationError::Forbidden {
            error_type,
            message,
        }
        .into(),
        404 => NotFoundError::Resource {
            error_type,
            message,
        }
        .into(),
        429 => RateLimitError::TooManyRequests {
            message,
            retry_after,
        }
        .into(),
        500..=599 => ServerError::Status {
            status,
            message,
            retry_after,
        }
        .into(),
        _ => ResponseError::UnexpectedStatus { status, message }.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchConfig, RetryConfig};
    use crate::errors::ErrorKind;
    use crate::mocks::{MockFailure, MockHttpTransport, MockResponse};
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use serde_json::json;

    fn config() -> AirtableConfig {
        AirtableConfig::builder()
            .api_key("pat123")
            .base_url("https://api.test/v0")
            .retry(RetryConfig {
                jitter: false,
                ..RetryConfig::default()
            })
            .build()
            .unwrap()
    }

    fn orchestrator(transport: &Arc<MockHttpTransport>) -> RequestOrchestrator {
        RequestOrchestrator::new(config(), transport.clone())
    }

    fn table() -> TableRef {
        TableRef::new("appBase", "Tasks")
    }

    fn record(id: &str) -> serde_json::Value {
        json!({"id": id, "createdTime": "2024-01-01T00:00:00.000Z", "fields": {"Name": id}})
    }

    fn fields(name: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("Name".to_string(), json!(name));
        fields
    }

    /// Echoes create/update bodies back as records named after their input.
    fn echo(request: &HttpRequest) -> MockResponse {
        let body: serde_json::Value = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or_default();
        let records: Vec<_> = body["records"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let id = r["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("recNew{}", i));
                json!({"id": id, "createdTime": "2024-01-01T00:00:00.000Z", "fields": r["fields"]})
            })
            .collect();
        MockResponse::ok(&json!({ "records": records }))
    }

    #[test]
    fn test_table_url_encodes_segments() {
        let transport = MockHttpTransport::new().shared();
        let orchestrator = orchestrator(&transport);

        let url = orchestrator
            .table_url(&TableRef::new("appX", "My Table"), &["rec1"])
            .unwrap();
        assert_eq!(url.as_str(), "https://api.test/v0/appX/My%20Table/rec1");
    }

    #[test]
    fn test_error_mapping() {
        let response = |status: u16, body: serde_json::Value| {
            HttpResponse::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Bytes::from(body.to_string()),
            )
        };

        let error = error_from_response(&response(
            422,
            json!({"error": {"type": "INVALID_VALUE_FOR_COLUMN", "message": "bad"}}),
        ));
        assert!(matches!(
            error,
            AirtableError::Validation(ValidationError::Rejected { status: 422, ref error_type, .. })
                if error_type.as_deref() == Some("INVALID_VALUE_FOR_COLUMN")
        ));

        let error = error_from_response(&response(404, json!({"error": "NOT_FOUND"})));
        assert_eq!(error.kind(), ErrorKind::NotFound);

        assert_eq!(
            error_from_response(&response(401, json!({}))).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_from_response(&response(403, json!({}))).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_from_response(&response(502, json!({}))).kind(),
            ErrorKind::Server
        );
        assert_eq!(
            error_from_response(&response(418, json!({}))).kind(),
            ErrorKind::Response
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_transient_failures_then_success() {
        let transport = MockHttpTransport::new()
            .add_responses([
                MockResponse::error(503, "SERVICE_UNAVAILABLE", "down"),
                MockResponse::failure(MockFailure::Network),
                MockResponse::error(500, "SERVER_ERROR", "oops"),
                MockResponse::ok(&record("rec1")),
            ])
            .shared();
        let orchestrator = orchestrator(&transport);

        let record = orchestrator
            .get(&table(), "rec1", &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(record.id, "rec1");
        assert_eq!(transport.request_count(), 4);
        assert_eq!(orchestrator.metrics().retries(), 3);

        // 100ms, 200ms, 400ms between attempts
        let at: Vec<_> = transport.recorded_requests().iter().map(|r| r.at).collect();
        assert_eq!(at[1] - at[0], Duration::from_millis(100));
        assert_eq!(at[2] - at[1], Duration::from_millis(200));
        assert_eq!(at[3] - at[2], Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(
                422,
                "INVALID_REQUEST_UNKNOWN",
                "Invalid request",
            ))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .create(&table(), fields("a"), WriteOptions::default(), &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_retryable());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts_with_last_error() {
        let transport = MockHttpTransport::new()
            .add_responses((0..4).map(|_| MockResponse::error(503, "UNAVAILABLE", "busy")))
            .add_response(MockResponse::error(502, "BAD_GATEWAY", "last"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .get(&table(), "rec1", &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(), 5);
        assert_eq!(error.status_code(), Some(StatusCode::BAD_GATEWAY));
        assert!(error.to_string().contains("last"));
    }

    /// Retries every failure, relying on the orchestrator to stop.
    struct AlwaysRetry;

    impl RetryPolicy for AlwaysRetry {
        fn should_retry(&self, _error: &AirtableError, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry(Duration::from_millis(1))
        }

        fn max_attempts(&self) -> u32 {
            3
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_overrides_custom_policy() {
        let transport = MockHttpTransport::new()
            .with_handler(|_| MockResponse::error(503, "UNAVAILABLE", "busy"))
            .shared();
        let orchestrator =
            RequestOrchestrator::with_policy(config(), transport.clone(), Arc::new(AlwaysRetry));

        let error = orchestrator
            .get(&table(), "rec1", &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(), 3);
        assert_eq!(error.status_code(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(orchestrator.metrics().retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::rate_limited(2))
            .add_response(MockResponse::ok(&record("rec1")))
            .shared();
        let orchestrator = orchestrator(&transport);

        orchestrator
            .get(&table(), "rec1", &CallOptions::new())
            .await
            .unwrap();

        let at: Vec<_> = transport.recorded_requests().iter().map(|r| r.at).collect();
        assert_eq!(at[1] - at[0], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_timeout_is_retried() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&record("rec1")).with_delay(Duration::from_secs(10)))
            .add_response(MockResponse::ok(&record("rec1")))
            .shared();
        let orchestrator = orchestrator(&transport);

        let record = orchestrator
            .get(
                &table(),
                "rec1",
                &CallOptions::new().timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert_eq!(record.id, "rec1");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_stops_retries() {
        let transport = MockHttpTransport::new()
            .with_handler(|_| MockResponse::rate_limited(10))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .get(
                &table(),
                "rec1",
                &CallOptions::new().operation_timeout(Duration::from_secs(3)),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            AirtableError::Cancelled(CancelledError::OperationTimeout(_))
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_paced_per_base() {
        let transport = MockHttpTransport::new().with_handler(echo).shared();
        let config = AirtableConfig::builder()
            .api_key("pat123")
            .base_url("https://api.test/v0")
            .batch(BatchConfig {
                max_batch_size: 1,
                max_concurrency: 12,
            })
            .build()
            .unwrap();
        let orchestrator = RequestOrchestrator::new(config, transport.clone());

        let records: Vec<Fields> = (0..12).map(|i| fields(&i.to_string())).collect();
        let result = orchestrator
            .create_many(&table(), records, WriteOptions::default(), &CallOptions::new())
            .await
            .unwrap();
        assert!(result.is_success());

        let mut at: Vec<_> = transport.recorded_requests().iter().map(|r| r.at).collect();
        at.sort();
        assert_eq!(at.len(), 12);
        for (i, start) in at.iter().enumerate() {
            let in_window = at[i..]
                .iter()
                .take_while(|t| **t < *start + Duration::from_secs(1))
                .count();
            assert!(in_window <= 5);
        }
        assert_eq!(at[11] - at[0], Duration::from_secs(2));
        assert!(orchestrator.metrics().snapshot().rate_limit_waits >= 7);
    }

    #[tokio::test]
    async fn test_create_many_chunks_and_aligns() {
        let transport = MockHttpTransport::new()
            .add_response(echo_for(0..10))
            .add_response(MockResponse::error(422, "INVALID_RECORDS", "bad chunk"))
            .add_response(echo_for(20..22))
            .shared();
        let config = AirtableConfig::builder()
            .api_key("pat123")
            .base_url("https://api.test/v0")
            .batch(BatchConfig {
                max_batch_size: 10,
                max_concurrency: 1,
            })
            .build()
            .unwrap();
        let orchestrator = RequestOrchestrator::new(config, transport.clone());

        let records: Vec<Fields> = (0..22).map(|i| fields(&i.to_string())).collect();
        let result = orchestrator
            .create_many(&table(), records, WriteOptions::default(), &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 3);
        assert_eq!(result.len(), 22);
        for (i, outcome) in result.iter().enumerate() {
            if (10..20).contains(&i) {
                assert_eq!(outcome.as_ref().unwrap_err().kind(), ErrorKind::Validation);
            } else {
                assert_eq!(outcome.as_ref().unwrap().id, format!("rec{}", i));
            }
        }

        let sizes: Vec<usize> = transport
            .recorded_requests()
            .iter()
            .map(|r| r.json().unwrap()["records"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 2]);
    }

    fn echo_for(ids: std::ops::Range<usize>) -> MockResponse {
        let records: Vec<_> = ids.map(|i| record(&format!("rec{}", i))).collect();
        MockResponse::ok(&json!({ "records": records }))
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let transport = MockHttpTransport::new().shared();
        let orchestrator = orchestrator(&transport);

        let result = orchestrator
            .delete_many(&table(), Vec::new(), &CallOptions::new())
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_fails_before_sending() {
        let transport = MockHttpTransport::new().shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .update_many(
                &table(),
                vec![
                    RecordUpdate::new("rec1", fields("a")),
                    RecordUpdate::new("", fields("b")),
                ],
                WriteOptions::default(),
                &CallOptions::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.stage(), Some(Stage::Batching));
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_update_uses_put_when_replacing() {
        let transport = MockHttpTransport::new().with_handler(echo).shared();
        let orchestrator = orchestrator(&transport);

        orchestrator
            .update_many(
                &table(),
                vec![RecordUpdate::new("rec1", fields("a"))],
                WriteOptions::default().replace(true).typecast(true),
                &CallOptions::new(),
            )
            .await
            .unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(
            request.json().unwrap(),
            json!({"records": [{"id": "rec1", "fields": {"Name": "a"}}], "typecast": true})
        );
        assert_eq!(request.header("authorization"), Some("Bearer pat123"));
    }

    #[tokio::test]
    async fn test_upsert_reports_created_flags() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&json!({
                "records": [record("recA"), record("recB")],
                "createdRecords": ["recB"],
                "updatedRecords": ["recA"]
            })))
            .shared();
        let orchestrator = orchestrator(&transport);

        let result = orchestrator
            .upsert_many(
                &table(),
                vec![fields("a").into(), fields("b").into()],
                UpsertOptions::merge_on(["Name"]),
                &CallOptions::new(),
            )
            .await
            .unwrap();

        let created: Vec<bool> = result.iter().map(|o| o.as_ref().unwrap().created).collect();
        assert_eq!(created, vec![false, true]);
        let body = transport.last_request().unwrap().json().unwrap();
        assert_eq!(body["performUpsert"], json!({"fieldsToMergeOn": ["Name"]}));
    }

    #[tokio::test]
    async fn test_upsert_requires_merge_fields() {
        let transport = MockHttpTransport::new().shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .upsert_many(
                &table(),
                vec![fields("a").into()],
                UpsertOptions::default(),
                &CallOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Batching));
    }

    #[tokio::test]
    async fn test_delete_missing_id_in_response() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&json!({
                "records": [{"id": "rec1", "deleted": true}]
            })))
            .shared();
        let orchestrator = orchestrator(&transport);

        let result = orchestrator
            .delete_many(
                &table(),
                vec!["rec1".to_string(), "rec2".to_string()],
                &CallOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result[0].as_ref().unwrap().id, "rec1");
        assert!(matches!(
            result[1].as_ref().unwrap_err().as_ref(),
            AirtableError::NotFound(NotFoundError::Record(id)) if id == "rec2"
        ));
        let request = transport.last_request().unwrap();
        assert_eq!(request.query_values("records[]"), vec!["rec1", "rec2"]);
    }

    #[tokio::test]
    async fn test_delete_chunk_not_found_falls_back_to_single_ids() {
        let transport = MockHttpTransport::new()
            .add_responses([
                MockResponse::error(404, "NOT_FOUND", "Could not find record"),
                MockResponse::ok(&json!({"records": [{"id": "rec1", "deleted": true}]})),
                MockResponse::error(404, "NOT_FOUND", "Could not find record"),
                MockResponse::ok(&json!({"records": [{"id": "rec3", "deleted": true}]})),
            ])
            .shared();
        let orchestrator = orchestrator(&transport);

        let ids = vec!["rec1".to_string(), "rec2".to_string(), "rec3".to_string()];
        let result = orchestrator
            .delete_many(&table(), ids, &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 4);
        assert!(result[0].is_ok());
        assert_eq!(result[1].as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        assert!(result[2].is_ok());
    }

    #[tokio::test]
    async fn test_delete_chunk_table_not_found_keeps_api_error() {
        let transport = MockHttpTransport::new()
            .with_handler(|_| MockResponse::error(404, "TABLE_NOT_FOUND", "Could not find table Tasks"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let ids = vec!["rec1".to_string(), "rec2".to_string(), "rec3".to_string()];
        let result = orchestrator
            .delete_many(&table(), ids, &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(result.failure_count(), 3);
        for outcome in result.iter() {
            let error = outcome.as_ref().unwrap_err();
            assert_eq!(error.kind(), ErrorKind::NotFound);
            assert!(matches!(
                error.as_ref(),
                AirtableError::NotFound(NotFoundError::Resource { error_type, message })
                    if error_type.as_deref() == Some("TABLE_NOT_FOUND")
                        && message == "Could not find table Tasks"
            ));
        }
    }

    #[tokio::test]
    async fn test_single_delete_table_not_found_keeps_api_error() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(404, "TABLE_NOT_FOUND", "Could not find table Tasks"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let result = orchestrator
            .delete_many(&table(), vec!["rec1".to_string()], &CallOptions::new())
            .await
            .unwrap();

        assert!(matches!(
            result[0].as_ref().unwrap_err().as_ref(),
            AirtableError::NotFound(NotFoundError::Resource { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_each_item() {
        let transport = MockHttpTransport::new().with_handler(echo).shared();
        let orchestrator = orchestrator(&transport);
        let token = CancellationToken::new();
        token.cancel();

        let result = orchestrator
            .create_many(
                &table(),
                vec![fields("a"), fields("b")],
                WriteOptions::default(),
                &CallOptions::new().cancel_on(token),
            )
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 0);
        assert_eq!(result.failure_count(), 2);
        assert_eq!(result[0].as_ref().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = MockHttpTransport::new()
            .with_handler(|_| MockResponse::rate_limited(30))
            .shared();
        let orchestrator = orchestrator(&transport);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let error = orchestrator
            .get(&table(), "rec1", &CallOptions::new().cancel_on(token))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_list_follows_cursors() {
        let transport = MockHttpTransport::new()
            .add_responses([
                MockResponse::ok(&json!({"records": [record("rec1")], "offset": "c1"})),
                MockResponse::ok(&json!({"records": [record("rec2")], "offset": "c2"})),
                MockResponse::ok(&json!({"records": [record("rec3")], "offset": "c3"})),
                MockResponse::ok(&json!({"records": [record("rec4")]})),
            ])
            .shared();
        let orchestrator = orchestrator(&transport);

        let records = orchestrator
            .all(&table(), ListParams::new().page_size(1), &CallOptions::new())
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2", "rec3", "rec4"]);
        let offsets: Vec<Vec<String>> = transport
            .recorded_requests()
            .iter()
            .map(|r| r.query_values("offset"))
            .collect();
        assert_eq!(
            offsets,
            vec![vec![], vec!["c1".to_string()], vec!["c2".to_string()], vec!["c3".to_string()]]
        );
        assert_eq!(orchestrator.metrics().snapshot().pages, 4);
    }

    #[tokio::test]
    async fn test_list_stops_when_consumer_stops() {
        let transport = MockHttpTransport::new()
            .with_handler(|_| MockResponse::ok(&json!({"records": [record("rec1")], "offset": "more"})))
            .shared();
        let orchestrator = orchestrator(&transport);

        let mut pages = orchestrator
            .list(&table(), ListParams::new(), &CallOptions::new())
            .unwrap();
        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        drop(pages);

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_first_requests_a_single_record() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&json!({"records": [record("rec9")], "offset": "x"})))
            .shared();
        let orchestrator = orchestrator(&transport);

        let first = orchestrator
            .first(&table(), ListParams::new().formula("{Name}='rec9'"), &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(first.unwrap().id, "rec9");
        let request = transport.last_request().unwrap();
        assert_eq!(request.query_values("maxRecords"), vec!["1"]);
        assert_eq!(request.query_values("filterByFormula"), vec!["{Name}='rec9'"]);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_long_list_url_switches_to_post() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&json!({"records": []})))
            .shared();
        let orchestrator = orchestrator(&transport);

        let formula = format!("OR({})", vec!["{Name}='x'"; 2000].join(","));
        orchestrator
            .all(&table(), ListParams::new().formula(formula.clone()), &CallOptions::new())
            .await
            .unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert!(request.url.path().ends_with("/appBase/Tasks/listRecords"));
        assert_eq!(request.json().unwrap()["filterByFormula"], json!(formula));
    }

    #[tokio::test]
    async fn test_page_failure_is_tagged() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(403, "NOT_AUTHORIZED", "nope"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .all(&table(), ListParams::new(), &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(error.stage(), Some(Stage::Pagination));
        assert_eq!(error.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_get_not_found_names_record() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(404, "NOT_FOUND", "Could not find"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .get(&table(), "recMissing", &CallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AirtableError::NotFound(NotFoundError::Record(ref id)) if id == "recMissing"
        ));
    }

    #[tokio::test]
    async fn test_get_missing_table_is_not_a_missing_record() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(404, "TABLE_NOT_FOUND", "Could not find table Tasks"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .get(&table(), "rec1", &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(matches!(
            error,
            AirtableError::NotFound(NotFoundError::Resource { ref error_type, .. })
                if error_type.as_deref() == Some("TABLE_NOT_FOUND")
        ));
        assert_eq!(transport.request_count(), 1);
    }

    fn comment(id: &str, text: &str) -> serde_json::Value {
        json!({
            "id": id,
            "text": text,
            "createdTime": "2024-01-01T00:00:00.000Z",
            "lastUpdatedTime": null,
            "author": {"id": "usrAuthor", "email": "author@example.com", "name": "Author"}
        })
    }

    #[tokio::test]
    async fn test_comments_follow_offsets() {
        let transport = MockHttpTransport::new()
            .add_responses([
                MockResponse::ok(&json!({"comments": [comment("com1", "a")], "offset": "c1"})),
                MockResponse::ok(&json!({"comments": [comment("com2", "b")], "offset": null})),
            ])
            .shared();
        let orchestrator = orchestrator(&transport);

        let comments = orchestrator
            .comments(&table(), "rec1", Some(1), &CallOptions::new())
            .unwrap()
            .collect_all()
            .await
            .unwrap();

        let texts: Vec<_> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        let requests = transport.recorded_requests();
        assert_eq!(requests[0].url.path(), "/v0/appBase/Tasks/rec1/comments");
        assert_eq!(requests[0].query_values("pageSize"), vec!["1"]);
        assert!(requests[0].query_values("offset").is_empty());
        assert_eq!(requests[1].query_values("offset"), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_comments_reject_bad_page_size() {
        let transport = MockHttpTransport::new().shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .comments(&table(), "rec1", Some(101), &CallOptions::new())
            .unwrap_err();

        assert_eq!(error.stage(), Some(Stage::Pagination));
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_comments_on_missing_record() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::error(404, "NOT_FOUND", "Could not find record"))
            .shared();
        let orchestrator = orchestrator(&transport);

        let error = orchestrator
            .comments(&table(), "recGone", None, &CallOptions::new())
            .unwrap()
            .collect_all()
            .await
            .unwrap_err();

        assert_eq!(error.stage(), Some(Stage::Pagination));
        assert!(matches!(
            error.root(),
            AirtableError::NotFound(NotFoundError::Record(id)) if id == "recGone"
        ));
    }

    #[tokio::test]
    async fn test_add_update_and_delete_comment() {
        let transport = MockHttpTransport::new()
            .add_responses([
                MockResponse::ok(&comment("com1", "Hello, @[usrB2]!")),
                MockResponse::ok(&comment("com1", "Never mind")),
                MockResponse::ok(&json!({"id": "com1", "deleted": true})),
            ])
            .shared();
        let orchestrator = orchestrator(&transport);
        let options = CallOptions::new();

        let added = orchestrator
            .add_comment(&table(), "rec1", "Hello, @[usrB2]!", &options)
            .await
            .unwrap();
        let edited = orchestrator
            .update_comment(&table(), "rec1", &added.id, "Never mind", &options)
            .await
            .unwrap();
        let deleted = orchestrator
            .delete_comment(&table(), "rec1", &added.id, &options)
            .await
            .unwrap();

        assert_eq!(edited.text, "Never mind");
        assert!(deleted.deleted);

        let requests = transport.recorded_requests();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url.path(), "/v0/appBase/Tasks/rec1/comments");
        assert_eq!(requests[0].json().unwrap(), json!({"text": "Hello, @[usrB2]!"}));
        assert_eq!(requests[1].method, HttpMethod::Patch);
        assert_eq!(requests[1].url.path(), "/v0/appBase/Tasks/rec1/comments/com1");
        assert_eq!(requests[1].json().unwrap(), json!({"text": "Never mind"}));
        assert_eq!(requests[2].method, HttpMethod::Delete);
        assert_eq!(requests[2].url.path(), "/v0/appBase/Tasks/rec1/comments/com1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_comment_writes_are_retried() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::rate_limited(1))
            .add_response(MockResponse::ok(&comment("com1", "hi")))
            .shared();
        let orchestrator = orchestrator(&transport);

        let added = orchestrator
            .add_comment(&table(), "rec1", "hi", &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(added.id, "com1");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_execute_dispatches_operations() {
        let transport = MockHttpTransport::new()
            .add_response(MockResponse::ok(&json!({"records": [{"id": "rec1", "deleted": true}]})))
            .shared();
        let orchestrator = orchestrator(&transport);

        let output = orchestrator
            .execute(
                &table(),
                Operation::DeleteMany(vec!["rec1".to_string()]),
                &CallOptions::new(),
            )
            .await
            .unwrap();

        match output {
            OperationOutput::Deleted(result) => assert!(result.is_success()),
            other => panic!("unexpected output {:?}", other),
        }
    }
}
