//! Provider selection and construction.

use std::path::Path;
use std::sync::Arc;

use gitprov_azure_devops::{collection_url, AzureDevOpsProvider};
use gitprov_core::{Error, GitProvider, ProviderConfig, ProviderKind, Result};
use gitprov_github::GitHubProvider;
use gitprov_gitlab::{instance_url, GitLabProvider};
use tokio::process::Command;
use tracing::debug;

use crate::detect::{canonical_host, detect_remote, DetectedRemote, RemoteCoordinates};

/// Environment lookup, replaceable in tests.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds the adapter for a repository.
///
/// Detection order: the explicit `provider` in the configuration, then the
/// host of the git remote URL. Coordinates missing from the configuration are
/// taken from the remote.
pub struct ProviderFactory {
    config: ProviderConfig,
    remote_url: Option<String>,
    env: EnvLookup,
}

impl ProviderFactory {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            remote_url: None,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Remote URL used for detection, typically from [`remote_url_from_git`].
    pub fn with_remote_url(mut self, remote_url: Option<String>) -> Self {
        self.remote_url = remote_url;
        self
    }

    /// Replace the environment lookup used for tokens.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn remote(&self) -> Option<DetectedRemote> {
        self.remote_url.as_deref().and_then(detect_remote)
    }

    /// Which provider this factory would build.
    pub fn resolve_kind(&self) -> Result<ProviderKind> {
        if let Some(kind) = self.config.provider {
            debug!(provider = %kind, "Provider from configuration");
            return Ok(kind);
        }
        if let Some(remote) = self.remote() {
            debug!(provider = %remote.kind, host = remote.host.as_str(), "Provider from git remote");
            return Ok(remote.kind);
        }
        Err(Error::NotConfigured(match &self.remote_url {
            Some(url) => format!("remote '{}' does not belong to a known provider", url),
            None => "no provider in configuration and no git remote".to_string(),
        }))
    }

    /// Build a ready provider.
    ///
    /// Fails with `NotConfigured` when no provider or coordinates resolve and
    /// with `Authentication` when the adapter has no usable credential.
    pub async fn create(&self) -> Result<Box<dyn GitProvider>> {
        let kind = self.resolve_kind()?;
        let remote = self.remote().filter(|r| r.kind == kind);

        let provider: Box<dyn GitProvider> = match kind {
            ProviderKind::GitHub => Box::new(self.build_github(remote.as_ref())?),
            ProviderKind::GitLab => Box::new(self.build_gitlab(remote.as_ref())?),
            ProviderKind::AzureDevOps => Box::new(self.build_azure_devops(remote.as_ref())?),
        };

        if !provider.is_available().await {
            return Err(Error::Authentication(format!(
                "{} credentials are not available",
                kind
            )));
        }
        Ok(provider)
    }

    /// Like [`create`](Self::create), but never fails: any problem yields
    /// `None` so callers can run offline.
    pub async fn create_safe(&self) -> Option<Box<dyn GitProvider>> {
        match self.create().await {
            Ok(provider) => Some(provider),
            Err(e) => {
                debug!(error = %e, "Provider unavailable, continuing without one");
                None
            }
        }
    }

    fn build_github(&self, remote: Option<&DetectedRemote>) -> Result<GitHubProvider> {
        let cfg = self.config.github.clone().unwrap_or_default();
        let from_remote = match remote.and_then(|r| r.coordinates.clone()) {
            Some(RemoteCoordinates::GitHub { owner, repo }) => Some((owner, repo)),
            _ => None,
        };

        let owner = cfg
            .owner
            .or_else(|| from_remote.as_ref().map(|(o, _)| o.clone()))
            .ok_or_else(|| Error::NotConfigured("GitHub owner is unknown".to_string()))?;
        let repo = cfg
            .repo
            .or_else(|| from_remote.map(|(_, r)| r))
            .ok_or_else(|| Error::NotConfigured("GitHub repository is unknown".to_string()))?;
        // Hosts from the remote are already canonical; aliases of github.com
        // must not be taken for Enterprise hosts.
        let host = cfg
            .host
            .map(|h| canonical_host(&h))
            .or_else(|| remote.map(|r| r.host.clone()))
            .filter(|h| h != "github.com");

        Ok(GitHubProvider::from_cli(
            owner,
            repo,
            host.as_deref(),
            cfg.cli_binary.as_deref(),
            self.config.http.timeout(),
        )?
        .with_retry_policy(self.config.http.retry_policy()))
    }

    fn build_gitlab(&self, remote: Option<&DetectedRemote>) -> Result<GitLabProvider> {
        let cfg = self.config.gitlab.clone().unwrap_or_default();
        let project = cfg
            .project
            .clone()
            .or_else(|| match remote.and_then(|r| r.coordinates.clone()) {
                Some(RemoteCoordinates::GitLab { project }) => Some(project),
                _ => None,
            })
            .ok_or_else(|| Error::NotConfigured("GitLab project is unknown".to_string()))?;
        let host = cfg.host.clone().or_else(|| remote.map(|r| r.host.clone()));
        let token = (self.env)(cfg.token_env());

        Ok(GitLabProvider::new(
            instance_url(host.as_deref()),
            project,
            token,
            self.config.http.timeout(),
        )?
        .with_retry_policy(self.config.http.retry_policy()))
    }

    fn build_azure_devops(&self, remote: Option<&DetectedRemote>) -> Result<AzureDevOpsProvider> {
        let cfg = self.config.azure_devops.clone().unwrap_or_default();
        let from_remote = match remote.and_then(|r| r.coordinates.clone()) {
            Some(RemoteCoordinates::AzureDevOps {
                organization,
                project,
                repository,
            }) => Some((organization, project, repository)),
            _ => None,
        };

        let organization = cfg
            .organization
            .clone()
            .or_else(|| from_remote.as_ref().map(|(o, _, _)| o.clone()))
            .ok_or_else(|| Error::NotConfigured("Azure DevOps organization is unknown".to_string()))?;
        let project = cfg
            .project
            .clone()
            .or_else(|| from_remote.as_ref().map(|(_, p, _)| p.clone()))
            .ok_or_else(|| Error::NotConfigured("Azure DevOps project is unknown".to_string()))?;
        let repository = cfg
            .repository
            .clone()
            .or_else(|| from_remote.map(|(_, _, r)| r));
        let pat = (self.env)(cfg.token_env());

        Ok(AzureDevOpsProvider::new(
            collection_url(cfg.host.as_deref()),
            organization,
            project,
            pat,
            self.config.http.timeout(),
        )?
        .with_repository(repository)
        .with_api_version(cfg.api_version())
        .with_closed_state(cfg.closed_state())
        .with_retry_policy(self.config.http.retry_policy()))
    }
}

/// `remote.origin.url` of the repository at `dir`, if any.
pub async fn remote_url_from_git(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| debug!(error = %e, "Failed to run git"))
        .ok()?;
    if !output.status.success() {
        debug!(status = %output.status, "No origin remote");
        return None;
    }
    let url = String::from_utf8(output.stdout).ok()?;
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}
