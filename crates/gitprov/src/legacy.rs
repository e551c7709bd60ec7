//! Entry points for call sites written against a single GitHub client.
//!
//! New code should use [`ProviderFactory`] and the capability traits.

use std::path::Path;

use gitprov_core::{GitProvider, ProviderConfig};

use crate::factory::{remote_url_from_git, ProviderFactory};

/// The GitHub adapter under its historical name.
pub type GitHubClient = gitprov_github::GitHubProvider;

/// The provider for the repository in the current directory, or `None` when
/// it cannot be built (offline, no credentials, unknown remote).
pub async fn default_provider(config: &ProviderConfig) -> Option<Box<dyn GitProvider>> {
    let remote_url = if config.provider.is_some() {
        None
    } else {
        remote_url_from_git(Path::new(".")).await
    };
    ProviderFactory::new(config.clone())
        .with_remote_url(remote_url)
        .create_safe()
        .await
}
