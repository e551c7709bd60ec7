//! GitLab provider adapter for gitprov.
//!
//! This crate provides integration with the GitLab REST API v4 (gitlab.com
//! or self-hosted) for issues, merge requests and milestones.

mod client;
mod types;

pub use client::{instance_url, GitLabProvider};
pub use types::*;

/// Default GitLab instance URL.
pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";
