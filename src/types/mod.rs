//! Type definitions for Airtable records and request parameters.
//!
//! Field values are opaque to this crate: they travel as [`Fields`], a JSON
//! object map, and are never inspected.

pub(crate) mod wire;

use crate::config::MAX_PAGE_SIZE;
use crate::errors::{AirtableError, AirtableResult, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field name to value mapping of a record.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Record identifier, e.g. `recXXXXXXXXXXXXXX`.
pub type RecordId = String;

/// A record returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Record id.
    pub id: RecordId,

    /// Creation time.
    pub created_time: DateTime<Utc>,

    /// Cell values. Empty cells are absent.
    #[serde(default)]
    pub fields: Fields,

    /// Number of comments, present when requested through
    /// [`ListParams::include_comment_count`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u32>,
}

/// Result of deleting one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    /// Record id.
    pub id: RecordId,
    /// Whether the record was deleted.
    pub deleted: bool,
}

/// An update to an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// Record id.
    pub id: RecordId,
    /// Fields to write.
    pub fields: Fields,
}

impl RecordUpdate {
    /// Creates a new update.
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// A record for an upsert: matched by id when given, otherwise by the merge
/// fields of [`UpsertOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertRecord {
    /// Record id, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Fields to write.
    pub fields: Fields,
}

impl From<Fields> for UpsertRecord {
    fn from(fields: Fields) -> Self {
        Self { id: None, fields }
    }
}

/// Result of upserting one record.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedRecord {
    /// The record as stored.
    pub record: Record,
    /// True if the record was created, false if an existing one was updated.
    pub created: bool,
}

/// Comment identifier, e.g. `comXXXXXXXXXXXXXX`.
pub type CommentId = String;

/// An Airtable account or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    /// User or group id.
    pub id: String,
    /// Email address, hidden for some accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A comment on a record.
///
/// Mentions appear in `text` as `@[usrXXXXXXXXXXXXXX]` and are resolved in
/// [`Comment::mentioned`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Comment id.
    pub id: CommentId,
    /// Comment text.
    pub text: String,
    /// Creation time.
    pub created_time: DateTime<Utc>,
    /// Time of the last edit, if any.
    #[serde(default)]
    pub last_updated_time: Option<DateTime<Utc>>,
    /// Account that wrote the comment.
    pub author: Collaborator,
    /// Users and groups mentioned in `text`, keyed by id.
    #[serde(default)]
    pub mentioned: HashMap<String, Mentioned>,
}

/// A user or group mentioned in a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentioned {
    /// User or group id.
    pub id: String,
    /// `user` or `userGroup`.
    #[serde(rename = "type")]
    pub mention_type: String,
    /// Display name.
    pub display_name: String,
    /// Email address, if visible.
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of deleting one comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedComment {
    /// Comment id.
    pub id: CommentId,
    /// Whether the comment was deleted.
    pub deleted: bool,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortDirection {
    /// Returns the wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// A sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Field name or id.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// Cell value format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellFormat {
    /// Raw JSON values.
    Json,
    /// Values formatted as displayed, requires time zone and locale.
    String,
}

impl CellFormat {
    /// Returns the wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellFormat::Json => "json",
            CellFormat::String => "string",
        }
    }
}

/// Parameters of a list operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    /// View name or id.
    pub view: Option<String>,
    /// Records per page, at most [`MAX_PAGE_SIZE`].
    pub page_size: Option<u32>,
    /// Total records to return across all pages.
    pub max_records: Option<u32>,
    /// Only return these fields.
    pub fields: Vec<String>,
    /// Sort order.
    pub sort: Vec<Sort>,
    /// Filter formula (`filterByFormula`).
    pub formula: Option<String>,
    /// Cell value format.
    pub cell_format: Option<CellFormat>,
    /// Time zone for string cell format.
    pub time_zone: Option<String>,
    /// Locale for string cell format.
    pub user_locale: Option<String>,
    /// Key returned fields by field id instead of name.
    pub return_fields_by_field_id: bool,
    /// Include each record's comment count.
    pub include_comment_count: bool,
}

impl ListParams {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the view.
    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Sets the page size.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the maximum number of records.
    pub fn max_records(mut self, max: u32) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Adds a field to return.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Adds a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the filter formula.
    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Sets the cell format.
    pub fn cell_format(mut self, format: CellFormat) -> Self {
        self.cell_format = Some(format);
        self
    }

    /// Sets the time zone.
    pub fn time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    /// Sets the user locale.
    pub fn user_locale(mut self, locale: impl Into<String>) -> Self {
        self.user_locale = Some(locale.into());
        self
    }

    /// Returns fields keyed by id.
    pub fn return_fields_by_field_id(mut self, enabled: bool) -> Self {
        self.return_fields_by_field_id = enabled;
        self
    }

    /// Requests comment counts.
    pub fn include_comment_count(mut self, enabled: bool) -> Self {
        self.include_comment_count = enabled;
        self
    }

    /// Checks the parameters before anything is sent.
    pub fn validate(&self) -> AirtableResult<()> {
        if let Some(size) = self.page_size {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(AirtableError::invalid_parameter(format!(
                    "page size must be between 1 and {}, got {}",
                    MAX_PAGE_SIZE, size
                )));
            }
        }
        if self.max_records == Some(0) {
            return Err(AirtableError::invalid_parameter(
                "max records must be positive",
            ));
        }
        if self.cell_format == Some(CellFormat::String)
            && (self.time_zone.is_none() || self.user_locale.is_none())
        {
            return Err(AirtableError::invalid_parameter(
                "string cell format requires a time zone and a user locale",
            ));
        }
        Ok(())
    }
}

/// Options shared by create, update and upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Let the API convert string values to the field's type.
    pub typecast: bool,
    /// Replace the whole record (PUT) instead of merging fields (PATCH).
    pub replace: bool,
    /// Key returned fields by field id instead of name.
    pub return_fields_by_field_id: bool,
}

impl WriteOptions {
    /// Enables typecasting.
    pub fn typecast(mut self, enabled: bool) -> Self {
        self.typecast = enabled;
        self
    }

    /// Enables destructive replacement.
    pub fn replace(mut self, enabled: bool) -> Self {
        self.replace = enabled;
        self
    }
}

/// Options of an upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Fields that identify an existing record.
    pub fields_to_merge_on: Vec<String>,
    /// Write options.
    pub write: WriteOptions,
}

impl UpsertOptions {
    /// Creates options merging on the given fields.
    pub fn merge_on<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields_to_merge_on: fields.into_iter().map(Into::into).collect(),
            write: WriteOptions::default(),
        }
    }

    /// Sets the write options.
    pub fn write(mut self, write: WriteOptions) -> Self {
        self.write = write;
        self
    }
}

/// Checks that `id` can be used as a URL path segment and record reference.
pub fn validate_record_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidRecordId(id.to_string()));
    }
    Ok(())
}
