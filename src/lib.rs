//! Airtable Integration Module
//!
//! This module provides a type-safe client for the Airtable REST API that
//! turns logical record operations into paced, chunked and retried HTTP
//! exchanges.
//!
//! # Features
//!
//! - **Rate Limiting**: At most 5 requests per second per base, shared by every table handle
//! - **Retries**: Exponential backoff for 429, 5xx and transport failures, honouring `Retry-After`
//! - **Batching**: Multi-record writes split into chunks of 10 with per-item results
//! - **Pagination**: Lazy cursor-following list operations
//! - **Cancellation**: Caller tokens and operation deadlines interrupt any wait
//! - **Comments**: List, add, edit and delete record comments
//!
//! # Example
//!
//! ```no_run
//! use integrations_airtable::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AirtableClient::builder()
//!     .api_key("patXXXXXXXX")
//!     .build()?;
//!
//! let tasks = client.table("appXXXXXXXX", "Tasks");
//!
//! let rows: Vec<Fields> = (0..25)
//!     .map(|i| {
//!         let mut fields = Fields::new();
//!         fields.insert("Name".into(), json!(format!("Task {}", i)));
//!         fields
//!     })
//!     .collect();
//!
//! // Three requests of 10, 10 and 5 records
//! let created = tasks.create_many(rows).await?;
//! println!("{} created, {} failed", created.successes().count(), created.failure_count());
//!
//! let open = tasks
//!     .all(ListParams::new().formula("NOT({Done})"))
//!     .await?;
//! println!("{} open tasks", open.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod auth;
pub mod batching;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod pagination;
pub mod resilience;
pub mod services;
pub mod transport;
pub mod types;

// Test doubles, also usable by downstream crates
pub mod mocks;

// Re-exports for convenience
pub use auth::{ApiKeyProvider, AuthProvider};
pub use batching::{AggregatedResult, ItemOutcome};
pub use client::{
    AirtableClient, AirtableClientBuilder, CallOptions, Operation, OperationOutput, TableRef,
};
pub use config::{AirtableConfig, AirtableConfigBuilder};
pub use errors::{AirtableError, AirtableResult, ErrorKind, Stage};
pub use pagination::{Page, Paginator};
pub use services::TableService;
pub use types::{
    CellFormat, Collaborator, Comment, CommentId, DeletedComment, DeletedRecord, Fields,
    ListParams, Mentioned, Record, RecordId, RecordUpdate, SortDirection, UpsertOptions,
    UpsertRecord, UpsertedRecord, WriteOptions,
};

/// Prelude module with commonly used types and traits.
///
/// ```no_run
/// use integrations_airtable::prelude::*;
/// ```
pub mod prelude {
    // Client
    pub use crate::client::{AirtableClient, CallOptions, Operation, OperationOutput};

    // Configuration
    pub use crate::config::{AirtableConfig, AirtableConfigBuilder, BatchConfig, RetryConfig};

    // Authentication
    pub use crate::auth::{ApiKeyProvider, AuthProvider};

    // Services
    pub use crate::services::TableService;

    // Common types
    pub use crate::types::{
        CellFormat, Comment, DeletedComment, DeletedRecord, Fields, ListParams, Mentioned, Record,
        RecordId, RecordUpdate, Sort, SortDirection, UpsertOptions, UpsertRecord, UpsertedRecord,
        WriteOptions,
    };

    // Results
    pub use crate::batching::AggregatedResult;
    pub use crate::pagination::{Page, Paginator};

    // Errors
    pub use crate::errors::{AirtableError, AirtableResult, ErrorKind, Stage};
}
