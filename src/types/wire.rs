//! Request and response bodies as they appear on the wire.

use super::{
    Comment, DeletedRecord, Fields, ListParams, Record, RecordId, Sort, UpsertRecord,
};
use serde::{Deserialize, Serialize};

/// Page of a list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsResponse {
    /// Records of this page.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Cursor for the next page; absent on the last page.
    #[serde(default)]
    pub offset: Option<String>,
}

/// Body of `POST {table}/listRecords`, used when the GET URL would be too long.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecordsBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by_formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_locale: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_fields_by_field_id: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub record_metadata: Vec<String>,
}

impl ListRecordsBody {
    /// Builds the body for one page.
    pub fn new(params: &ListParams, offset: Option<&str>) -> Self {
        Self {
            offset: offset.map(str::to_string),
            page_size: params.page_size,
            max_records: params.max_records,
            view: params.view.clone(),
            fields: params.fields.clone(),
            sort: params.sort.clone(),
            filter_by_formula: params.formula.clone(),
            cell_format: params.cell_format.map(|f| f.as_str().to_string()),
            time_zone: params.time_zone.clone(),
            user_locale: params.user_locale.clone(),
            return_fields_by_field_id: params.return_fields_by_field_id,
            record_metadata: comment_count_metadata(params),
        }
    }
}

fn comment_count_metadata(params: &ListParams) -> Vec<String> {
    if params.include_comment_count {
        vec!["commentCount".to_string()]
    } else {
        Vec::new()
    }
}

/// Query pairs of `GET {table}` for one page.
pub fn list_query(params: &ListParams, offset: Option<&str>) -> Vec<(String, String)> {
    let mut query = Vec::new();

    if let Some(offset) = offset {
        query.push(("offset".to_string(), offset.to_string()));
    }
    if let Some(size) = params.page_size {
        query.push(("pageSize".to_string(), size.to_string()));
    }
    if let Some(max) = params.max_records {
        query.push(("maxRecords".to_string(), max.to_string()));
    }
    if let Some(view) = &params.view {
        query.push(("view".to_string(), view.clone()));
    }
    for field in &params.fields {
        query.push(("fields[]".to_string(), field.clone()));
    }
    for (i, sort) in params.sort.iter().enumerate() {
        query.push((format!("sort[{}][field]", i), sort.field.clone()));
        query.push((
            format!("sort[{}][direction]", i),
            sort.direction.as_str().to_string(),
        ));
    }
    if let Some(formula) = &params.formula {
        query.push(("filterByFormula".to_string(), formula.clone()));
    }
    if let Some(format) = params.cell_format {
        query.push(("cellFormat".to_string(), format.as_str().to_string()));
    }
    if let Some(tz) = &params.time_zone {
        query.push(("timeZone".to_string(), tz.clone()));
    }
    if let Some(locale) = &params.user_locale {
        query.push(("userLocale".to_string(), locale.clone()));
    }
    if params.return_fields_by_field_id {
        query.push(("returnFieldsByFieldId".to_string(), "true".to_string()));
    }
    for meta in comment_count_metadata(params) {
        query.push(("recordMetadata[]".to_string(), meta));
    }

    query
}

/// A record in a create request.
#[derive(Debug, Clone, Serialize)]
pub struct NewRecord<'a> {
    pub fields: &'a Fields,
}

/// Body of `POST {table}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordsRequest<'a> {
    pub records: Vec<NewRecord<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub typecast: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_fields_by_field_id: bool,
}

/// A record in an update or upsert request.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    pub fields: &'a Fields,
}

impl<'a> From<&'a UpsertRecord> for UpdateRecord<'a> {
    fn from(record: &'a UpsertRecord) -> Self {
        Self {
            id: record.id.as_deref(),
            fields: &record.fields,
        }
    }
}

/// `performUpsert` clause of an upsert request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformUpsert<'a> {
    pub fields_to_merge_on: &'a [String],
}

/// Body of `PATCH`/`PUT {table}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecordsRequest<'a> {
    pub records: Vec<UpdateRecord<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub typecast: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_fields_by_field_id: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perform_upsert: Option<PerformUpsert<'a>>,
}

/// Body of `PATCH`/`PUT {table}/{record}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleRecordRequest<'a> {
    pub fields: &'a Fields,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub typecast: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_fields_by_field_id: bool,
}

/// Records returned by create and update.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordsResponse {
    pub records: Vec<Record>,
}

/// Records returned by an upsert.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    pub records: Vec<Record>,
    #[serde(default)]
    pub created_records: Vec<RecordId>,
    #[serde(default)]
    pub updated_records: Vec<RecordId>,
}

/// Body returned by a delete.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRecordsResponse {
    pub records: Vec<DeletedRecord>,
}

/// Page of record comments.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentsResponse {
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub offset: Option<String>,
}

/// Body of a comment create or edit.
#[derive(Debug, Clone, Serialize)]
pub struct CommentRequest<'a> {
    pub text: &'a str,
}

/// Query of one comments page.
pub fn comments_query(page_size: Option<u32>, offset: Option<&str>) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(size) = page_size {
        query.push(("pageSize".to_string(), size.to_string()));
    }
    if let Some(offset) = offset {
        query.push(("offset".to_string(), offset.to_string()));
    }
    query
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Either `{"type": ..., "message": ...}` or a bare error code.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Detailed {
        #[serde(rename = "type")]
        error_type: String,
        #[serde(default)]
        message: Option<String>,
    },
    Code(String),
}

impl ErrorDetail {
    /// Error type code, e.g. `NOT_FOUND`.
    pub fn error_type(&self) -> &str {
        match self {
            ErrorDetail::Detailed { error_type, .. } => error_type,
            ErrorDetail::Code(code) => code,
        }
    }

    /// Message, falling back to the type code.
    pub fn message(&self) -> &str {
        match self {
            ErrorDetail::Detailed {
                message: Some(message),
                ..
            } => message,
            other => other.error_type(),
        }
    }
}
