//! Azure DevOps API response and request types.
//!
//! These types represent the raw JSON of the Azure DevOps REST API 7.x.
//! They are deserialized and then mapped to unified types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Work items
// =============================================================================

/// Azure DevOps work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureWorkItem {
    pub id: u64,
    #[serde(default)]
    pub rev: Option<u64>,
    pub fields: AzureWorkItemFields,
    #[serde(default)]
    pub url: Option<String>,
}

/// The subset of work item fields the adapter reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureWorkItemFields {
    #[serde(rename = "System.Title")]
    pub title: String,
    #[serde(rename = "System.WorkItemType")]
    pub work_item_type: String,
    #[serde(rename = "System.State")]
    pub state: String,
    /// HTML.
    #[serde(default, rename = "System.Description")]
    pub description: Option<String>,
    /// `; `-separated.
    #[serde(default, rename = "System.Tags")]
    pub tags: Option<String>,
    #[serde(default, rename = "System.IterationPath")]
    pub iteration_path: Option<String>,
    #[serde(default, rename = "Microsoft.VSTS.Common.Priority")]
    pub priority: Option<i64>,
    #[serde(rename = "System.CreatedDate")]
    pub created_date: DateTime<Utc>,
    #[serde(rename = "System.ChangedDate")]
    pub changed_date: DateTime<Utc>,
}

/// Fields requested from the batch endpoint.
pub const WORK_ITEM_FIELDS: &[&str] = &[
    "System.Title",
    "System.WorkItemType",
    "System.State",
    "System.Description",
    "System.Tags",
    "System.IterationPath",
    "Microsoft.VSTS.Common.Priority",
    "System.CreatedDate",
    "System.ChangedDate",
];

/// One operation of a JSON-Patch document.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: serde_json::Value,
}

impl PatchOperation {
    pub fn add_field(field: &str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{}", field),
            value: value.into(),
        }
    }
}

// =============================================================================
// WIQL
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct WiqlQuery {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResult {
    #[serde(default)]
    pub work_items: Vec<WorkItemReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemReference {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkItemBatchRequest {
    pub ids: Vec<u64>,
    pub fields: Vec<&'static str>,
}

/// `{ "count": n, "value": [...] }` envelope used by list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub count: Option<u64>,
    pub value: Vec<T>,
}

// =============================================================================
// Iterations
// =============================================================================

/// Iteration classification node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureIteration {
    pub id: u64,
    #[serde(default)]
    pub identifier: Option<String>,
    pub name: String,
    /// `\Project\Iteration\Sprint 1`
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: Option<IterationAttributes>,
    #[serde(default)]
    pub children: Vec<AzureIteration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateIterationBody {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<IterationAttributes>,
}

// =============================================================================
// Pull requests
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzurePullRequest {
    pub pull_request_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `active`, `completed` or `abandoned`.
    pub status: String,
    pub source_ref_name: String,
    pub target_ref_name: String,
    #[serde(default)]
    pub is_draft: bool,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub closed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<AzureLabel>,
    #[serde(default)]
    pub repository: Option<AzureRepository>,
    #[serde(default)]
    pub work_item_refs: Vec<ResourceRef>,
}

/// Reference with a string id, as used by the Git API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureRepository {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureLabel {
    pub name: String,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestBody {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_ref_name: String,
    pub target_ref_name: String,
    pub is_draft: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub work_item_refs: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLabelBody {
    pub name: String,
}
