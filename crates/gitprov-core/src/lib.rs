//! Core traits, types, and error handling for gitprov.
//!
//! This crate holds everything the provider adapters share: the domain model,
//! the error taxonomy, label/type mapping, HTTP helpers and the retry policy.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod labels;
pub mod provider;
pub mod retry;
pub mod types;

pub use cache::TtlCache;
pub use config::{AuthMethod, AzureDevOpsConfig, GitHubConfig, GitLabConfig, HttpConfig, ProviderConfig};
pub use error::{Error, Result};
pub use labels::{LabelScheme, PriorityFormat, WorkItemTypeMap};
pub use provider::{GitProvider, IssueProvider, MilestoneProvider, PullRequestProvider};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use types::*;
