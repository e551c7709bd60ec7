//! Azure DevOps provider adapter for gitprov.
//!
//! Issues are work items, milestones are iterations and pull requests live in
//! one Git repository of the project. Authentication uses a personal access
//! token.

mod client;
mod types;

pub use client::{collection_url, AzureDevOpsProvider};
pub use types::*;

/// Default Azure DevOps Services URL.
pub const DEFAULT_AZURE_DEVOPS_URL: &str = "https://dev.azure.com";

/// State written when a work item is reopened.
pub const REOPEN_STATE: &str = "Active";
