//! Table service for the Airtable records API.
//!
//! This module provides record operations on one table:
//! - Reads (list with lazy pagination, get, first)
//! - Single-record writes (create, update, delete)
//! - Multi-record writes split into chunks (create, update, upsert, delete)
//! - Record comments

use crate::batching::AggregatedResult;
use crate::client::{CallOptions, Operation, OperationOutput, RequestOrchestrator, TableRef};
use crate::errors::AirtableResult;
use crate::pagination::Paginator;
use crate::types::*;
use tokio_util::sync::CancellationToken;

/// Service for record operations on one table.
#[derive(Debug, Clone)]
pub struct TableService {
    orchestrator: RequestOrchestrator,
    table: TableRef,
    write: WriteOptions,
    options: CallOptions,
}

impl TableService {
    /// Creates a new table service.
    pub(crate) fn new(orchestrator: RequestOrchestrator, table: TableRef) -> Self {
        Self {
            orchestrator,
            table,
            write: WriteOptions::default(),
            options: CallOptions::default(),
        }
    }

    /// The table this service targets.
    pub fn table_ref(&self) -> &TableRef {
        &self.table
    }

    /// Uses `options` for every following call.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns a handle using `options`, leaving this one untouched.
    ///
    /// Handles are cheap to clone and share rate windows, so this is the way
    /// to give a single call its own token or deadline.
    ///
    /// ```no_run
    /// # use integrations_airtable::*;
    /// # use std::time::Duration;
    /// # async fn example(tasks: TableService) -> AirtableResult<()> {
    /// let record = tasks
    ///     .scoped(CallOptions::new().operation_timeout(Duration::from_secs(5)))
    ///     .get("recXXXXXXXXXXXXXX")
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn scoped(&self, options: CallOptions) -> Self {
        self.clone().with_options(options)
    }

    /// Cancels every following call once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    /// Uses `write` for create and update calls.
    pub fn with_write_options(mut self, write: WriteOptions) -> Self {
        self.write = write;
        self
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Lists records page by page.
    ///
    /// Nothing is sent until the first [`Paginator::next_page`] call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use integrations_airtable::*;
    /// # async fn example(client: AirtableClient) -> AirtableResult<()> {
    /// let mut pages = client
    ///     .table("appXXXXXXXX", "Tasks")
    ///     .list(ListParams::new().page_size(50).sort("Due", SortDirection::Asc))?;
    ///
    /// while let Some(page) = pages.next_page().await? {
    ///     println!("{} records", page.len());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn list(&self, params: ListParams) -> AirtableResult<Paginator<Record>> {
        self.orchestrator.list(&self.table, params, &self.options)
    }

    /// Lists every matching record.
    pub async fn all(&self, params: ListParams) -> AirtableResult<Vec<Record>> {
        self.orchestrator.all(&self.table, params, &self.options).await
    }

    /// Returns the first matching record.
    pub async fn first(&self, params: ListParams) -> AirtableResult<Option<Record>> {
        self.orchestrator
            .first(&self.table, params, &self.options)
            .await
    }

    /// Gets a record by id.
    pub async fn get(&self, record_id: &str) -> AirtableResult<Record> {
        self.orchestrator
            .get(&self.table, record_id, &self.options)
            .await
    }

    // ========================================================================
    // Single-record writes
    // ========================================================================

    /// Creates a record.
    pub async fn create(&self, fields: Fields) -> AirtableResult<Record> {
        self.orchestrator
            .create(&self.table, fields, self.write, &self.options)
            .await
    }

    /// Updates a record.
    pub async fn update(&self, record_id: &str, fields: Fields) -> AirtableResult<Record> {
        self.orchestrator
            .update(
                &self.table,
                RecordUpdate::new(record_id, fields),
                self.write,
                &self.options,
            )
            .await
    }

    /// Deletes a record.
    pub async fn delete(&self, record_id: &str) -> AirtableResult<DeletedRecord> {
        self.orchestrator
            .delete(&self.table, record_id, &self.options)
            .await
    }

    // ========================================================================
    // Multi-record writes
    // ========================================================================

    /// Creates records; the result lines up with `records`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use integrations_airtable::*;
    /// # async fn example(client: AirtableClient, rows: Vec<Fields>) -> AirtableResult<()> {
    /// let result = client.table("appXXXXXXXX", "Tasks").create_many(rows).await?;
    /// for (index, error) in result.failures() {
    ///     eprintln!("row {} failed: {}", index, error);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_many(
        &self,
        records: Vec<Fields>,
    ) -> AirtableResult<AggregatedResult<Record>> {
        self.orchestrator
            .create_many(&self.table, records, self.write, &self.options)
            .await
    }

    /// Updates records; the result lines up with `updates`.
    pub async fn update_many(
        &self,
        updates: Vec<RecordUpdate>,
    ) -> AirtableResult<AggregatedResult<Record>> {
        self.orchestrator
            .update_many(&self.table, updates, self.write, &self.options)
            .await
    }

    /// Creates or updates records matched on `fields_to_merge_on`.
    pub async fn upsert_many(
        &self,
        records: Vec<UpsertRecord>,
        upsert: UpsertOptions,
    ) -> AirtableResult<AggregatedResult<UpsertedRecord>> {
        self.orchestrator
            .upsert_many(&self.table, records, upsert, &self.options)
            .await
    }

    /// Deletes records; the result lines up with `ids`.
    pub async fn delete_many(
        &self,
        ids: Vec<RecordId>,
    ) -> AirtableResult<AggregatedResult<DeletedRecord>> {
        self.orchestrator
            .delete_many(&self.table, ids, &self.options)
            .await
    }

    // ========================================================================
    // Comments
    // ========================================================================

    /// Lists the comments of a record page by page.
    pub fn comments(&self, record_id: &str) -> AirtableResult<Paginator<Comment>> {
        self.orchestrator
            .comments(&self.table, record_id, None, &self.options)
    }

    /// Adds a comment to a record. Mention users with `@[usrXXXXXXXXXXXXXX]`.
    pub async fn add_comment(&self, record_id: &str, text: &str) -> AirtableResult<Comment> {
        self.orchestrator
            .add_comment(&self.table, record_id, text, &self.options)
            .await
    }

    /// Replaces the text of a comment.
    pub async fn update_comment(
        &self,
        record_id: &str,
        comment_id: &str,
        text: &str,
    ) -> AirtableResult<Comment> {
        self.orchestrator
            .update_comment(&self.table, record_id, comment_id, text, &self.options)
            .await
    }

    /// Deletes a comment.
    pub async fn delete_comment(
        &self,
        record_id: &str,
        comment_id: &str,
    ) -> AirtableResult<DeletedComment> {
        self.orchestrator
            .delete_comment(&self.table, record_id, comment_id, &self.options)
            .await
    }

    /// Runs a logical operation.
    pub async fn execute(&self, operation: Operation) -> AirtableResult<OperationOutput> {
        self.orchestrator
            .execute(&self.table, operation, &self.options)
            .await
    }
}
