//! GitHub provider adapter for gitprov.
//!
//! Talks to the REST v3 API of github.com or a GitHub Enterprise host.
//! Credentials come from the `gh` CLI unless a token is supplied directly.

mod client;
mod types;

pub use client::{api_base_url, GitHubAuth, GitHubProvider};
pub use types::*;

/// Default GitHub API URL.
pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com";

/// Default name of the GitHub CLI binary.
pub const DEFAULT_CLI_BINARY: &str = "gh";
