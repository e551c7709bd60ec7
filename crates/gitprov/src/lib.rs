//! gitprov: one interface over GitHub, GitLab and Azure DevOps.
//!
//! Build a [`ProviderConfig`], hand it to a [`ProviderFactory`] together with
//! the repository's remote URL, and use the returned [`GitProvider`].
//!
//! ```no_run
//! use gitprov::{CreateIssueRequest, IssueProvider, IssueType, ProviderConfig, ProviderFactory};
//!
//! # async fn run() -> gitprov::Result<()> {
//! let config = ProviderConfig::github("octo", "hello");
//! let provider = ProviderFactory::new(config).create().await?;
//! let issue = provider
//!     .create_issue(CreateIssueRequest::new("Bug: login fails", IssueType::Bug))
//!     .await?;
//! println!("{}", issue.id);
//! # Ok(())
//! # }
//! ```

pub mod detect;
pub mod factory;
pub mod legacy;

pub use detect::{
    canonical_host, detect_remote, provider_for_host, DetectedRemote, RemoteCoordinates,
};
pub use factory::{remote_url_from_git, ProviderFactory};
pub use gitprov_core::*;

pub use gitprov_azure_devops::AzureDevOpsProvider;
pub use gitprov_github::GitHubProvider;
pub use gitprov_gitlab::GitLabProvider;
