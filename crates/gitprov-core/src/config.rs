//! Provider configuration.
//!
//! The structure mirrors the YAML document the host tool keeps next to the
//! repository:
//!
//! ```yaml
//! provider: azure_devops
//! auto_detected: true
//! detection_source: git_remote
//! azure_devops:
//!   organization: contoso
//!   project: web
//!   api_version: "7.1"
//! http:
//!   timeout_secs: 20
//! ```
//!
//! This layer reads the document; it never writes it. Missing coordinates are
//! filled in from the git remote by the factory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::types::ProviderKind;
use crate::{Error, Result};

pub const GITLAB_TOKEN_ENV: &str = "GITLAB_TOKEN";
pub const AZURE_DEVOPS_PAT_ENV: &str = "AZURE_DEVOPS_PAT";
pub const DEFAULT_AZURE_API_VERSION: &str = "7.1";
pub const DEFAULT_AZURE_CLOSED_STATE: &str = "Closed";

/// Top-level configuration passed explicitly into the factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Explicit provider; wins over remote detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    /// Set by the wizard when `provider` came from the git remote.
    #[serde(default)]
    pub auto_detected: bool,

    /// Where the provider value came from (`git_remote`, `manual`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitLabConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_devops: Option<AzureDevOpsConfig>,

    #[serde(default)]
    pub http: HttpConfig,
}

/// How an adapter obtains its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Ask the provider's own CLI (GitHub `gh`).
    Cli,
    /// Read a token from an environment variable.
    Token,
    /// Azure DevOps personal access token from the environment.
    Pat,
}

/// GitHub coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Enterprise host, e.g. `ghe.example.com`. Absent means github.com.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Path or name of the `gh` binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_binary: Option<String>,
}

/// GitLab coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Instance URL or bare host; absent means gitlab.com.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Numeric project id or `group/subgroup/project` path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    /// Environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl GitLabConfig {
    pub fn token_env(&self) -> &str {
        self.token_env.as_deref().unwrap_or(GITLAB_TOKEN_ENV)
    }
}

/// Azure DevOps coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureDevOpsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Git repository for pull requests; defaults to the project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Azure DevOps Server URL; absent means dev.azure.com.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Work item state written when closing (`Closed`, `Done`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_state: Option<String>,
}

impl AzureDevOpsConfig {
    pub fn api_version(&self) -> &str {
        self.api_version
            .as_deref()
            .unwrap_or(DEFAULT_AZURE_API_VERSION)
    }

    pub fn closed_state(&self) -> &str {
        self.closed_state
            .as_deref()
            .unwrap_or(DEFAULT_AZURE_CLOSED_STATE)
    }

    pub fn token_env(&self) -> &str {
        self.token_env.as_deref().unwrap_or(AZURE_DEVOPS_PAT_ENV)
    }
}

/// Transport settings shared by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

impl ProviderConfig {
    /// Parse a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| Error::validation("config", format!("failed to parse config: {}", e)))
    }

    /// Load configuration from a file.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        debug!(path = ?path, "Loading config");

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::validation("config", format!("failed to read config file: {}", e))
        })?;

        Self::from_yaml(&contents)
    }

    /// Configuration pinned to one GitHub repository.
    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            provider: Some(ProviderKind::GitHub),
            github: Some(GitHubConfig {
                owner: Some(owner.into()),
                repo: Some(repo.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Providers that have a configuration block.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        let mut providers = Vec::new();
        if self.github.is_some() {
            providers.push(ProviderKind::GitHub);
        }
        if self.gitlab.is_some() {
            providers.push(ProviderKind::GitLab);
        }
        if self.azure_devops.is_some() {
            providers.push(ProviderKind::AzureDevOps);
        }
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert!(config.provider.is_none());
        assert!(!config.auto_detected);
        assert!(config.configured_providers().is_empty());
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.http.retry_policy(), RetryPolicy::default());
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
provider: azure_devops
auto_detected: true
detection_source: git_remote
azure_devops:
  organization: contoso
  project: web
  host: https://tfs.contoso.local
  api_version: "7.0"
  auth_method: pat
  closed_state: Done
gitlab:
  project: group/app
http:
  timeout_secs: 10
  max_attempts: 5
"#;
        let config = ProviderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.provider, Some(ProviderKind::AzureDevOps));
        assert!(config.auto_detected);
        assert_eq!(config.detection_source.as_deref(), Some("git_remote"));

        let azure = config.azure_devops.as_ref().unwrap();
        assert_eq!(azure.organization.as_deref(), Some("contoso"));
        assert_eq!(azure.api_version(), "7.0");
        assert_eq!(azure.closed_state(), "Done");
        assert_eq!(azure.auth_method, Some(AuthMethod::Pat));
        assert_eq!(azure.token_env(), AZURE_DEVOPS_PAT_ENV);

        let gitlab = config.gitlab.as_ref().unwrap();
        assert_eq!(gitlab.token_env(), GITLAB_TOKEN_ENV);

        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.http.max_attempts, 5);
        assert_eq!(config.http.base_delay_ms, 1000);
        assert_eq!(
            config.configured_providers(),
            vec![ProviderKind::GitLab, ProviderKind::AzureDevOps]
        );
    }

    #[test]
    fn test_azure_defaults() {
        let azure = AzureDevOpsConfig::default();
        assert_eq!(azure.api_version(), "7.1");
        assert_eq!(azure.closed_state(), "Closed");
    }

    #[test]
    fn test_invalid_yaml_is_validation_error() {
        let err = ProviderConfig::from_yaml("provider: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "config"));

        let err = ProviderConfig::from_yaml("provider: bitbucket").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(
            ProviderConfig::from_yaml("  \n").unwrap(),
            ProviderConfig::default()
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "provider: github").unwrap();
        writeln!(file, "github:").unwrap();
        writeln!(file, "  owner: octo").unwrap();
        writeln!(file, "  repo: hello").unwrap();

        let config = ProviderConfig::load_from(file.path()).unwrap();
        assert_eq!(config, ProviderConfig::github("octo", "hello"));
    }

    #[test]
    fn test_load_nonexistent() {
        let config = ProviderConfig::load_from(Path::new("/nonexistent/gitprov.yml")).unwrap();
        assert_eq!(config, ProviderConfig::default());
    }
}
