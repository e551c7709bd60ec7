//! Provider detection from a git remote URL.
//!
//! Recognised forms:
//!
//! - scp-style SSH: `git@github.com:owner/repo.git`
//! - `ssh://git@gitlab.example.com:2222/group/sub/project.git`
//! - `https://user@dev.azure.com/org/project/_git/repo`
//! - Azure v3 SSH: `git@ssh.dev.azure.com:v3/org/project/repo`
//! - legacy Azure: `https://org.visualstudio.com[/DefaultCollection]/project/_git/repo`

use gitprov_core::ProviderKind;
use percent_encoding::percent_decode_str;
use url::Url;

/// Repository coordinates extracted from a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCoordinates {
    GitHub {
        owner: String,
        repo: String,
    },
    GitLab {
        /// `group/subgroup/project`
        project: String,
    },
    AzureDevOps {
        organization: String,
        project: String,
        repository: String,
    },
}

/// Result of parsing a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedRemote {
    pub kind: ProviderKind,
    /// Lower-cased canonical host name without port.
    pub host: String,
    /// `None` when the host is recognised but the path is not.
    pub coordinates: Option<RemoteCoordinates>,
}

/// Collapse alternate spellings of the public hosts onto their canonical name.
///
/// `ssh.github.com` serves SSH over port 443, and `github.com-work` style
/// names are `~/.ssh/config` aliases; neither is an Enterprise host.
pub fn canonical_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    if host == "ssh.github.com" || host.starts_with("github.com-") {
        "github.com".to_string()
    } else if host == "altssh.gitlab.com" || host.starts_with("gitlab.com-") {
        "gitlab.com".to_string()
    } else {
        host
    }
}

/// Classify a host name.
pub fn provider_for_host(host: &str) -> Option<ProviderKind> {
    let host = host.trim().to_ascii_lowercase();
    if host == "dev.azure.com"
        || host == "ssh.dev.azure.com"
        || host == "visualstudio.com"
        || host.ends_with(".visualstudio.com")
    {
        Some(ProviderKind::AzureDevOps)
    } else if host == "github.com" || host.starts_with("ghe.") || host.contains("github") {
        Some(ProviderKind::GitHub)
    } else if host == "gitlab.com" || host.starts_with("gitlab.") || host.contains("gitlab") {
        Some(ProviderKind::GitLab)
    } else {
        None
    }
}

/// Detect the provider and coordinates of a remote URL.
///
/// Returns `None` for unparseable URLs and unknown hosts.
pub fn detect_remote(remote: &str) -> Option<DetectedRemote> {
    let url = parse_remote_url(remote)?;
    let host = canonical_host(url.host_str()?);
    let kind = provider_for_host(&host)?;

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(|seg| percent_decode_str(seg).decode_utf8_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    let coordinates = match kind {
        ProviderKind::GitHub => github_coordinates(&segments),
        ProviderKind::GitLab => gitlab_coordinates(&segments),
        ProviderKind::AzureDevOps => azure_coordinates(&host, &segments),
    };

    Some(DetectedRemote {
        kind,
        host,
        coordinates,
    })
}

/// Parse any supported remote spelling into a `Url`.
fn parse_remote_url(remote: &str) -> Option<Url> {
    let remote = remote.trim();
    if remote.is_empty() {
        return None;
    }
    if remote.contains("://") {
        return Url::parse(remote).ok();
    }

    // scp-like syntax: [user@]host:path
    let (authority, path) = remote.split_once(':')?;
    if authority.contains('/') || path.starts_with("//") {
        return None;
    }
    Url::parse(&format!("ssh://{}/{}", authority, path.trim_start_matches('/'))).ok()
}

fn strip_git_suffix(name: &str) -> String {
    name.strip_suffix(".git").unwrap_or(name).to_string()
}

fn github_coordinates(segments: &[String]) -> Option<RemoteCoordinates> {
    match segments {
        [owner, repo, ..] => Some(RemoteCoordinates::GitHub {
            owner: owner.clone(),
            repo: strip_git_suffix(repo),
        }),
        _ => None,
    }
}

fn gitlab_coordinates(segments: &[String]) -> Option<RemoteCoordinates> {
    if segments.len() < 2 {
        return None;
    }
    let mut parts: Vec<String> = segments.to_vec();
    if let Some(last) = parts.last_mut() {
        *last = strip_git_suffix(last);
    }
    Some(RemoteCoordinates::GitLab {
        project: parts.join("/"),
    })
}

fn azure(organization: &str, project: &str, repository: &str) -> Option<RemoteCoordinates> {
    Some(RemoteCoordinates::AzureDevOps {
        organization: organization.to_string(),
        project: project.to_string(),
        repository: strip_git_suffix(repository),
    })
}

fn azure_coordinates(host: &str, segments: &[String]) -> Option<RemoteCoordinates> {
    match segments {
        // ssh.dev.azure.com and vs-ssh.visualstudio.com
        [v3, org, project, repo] if v3 == "v3" => azure(org, project, repo),
        // dev.azure.com/org/project/_git/repo
        [org, project, git, repo] if git == "_git" && host == "dev.azure.com" => {
            azure(org, project, repo)
        }
        _ => {
            // org.visualstudio.com[/DefaultCollection]/project/_git/repo
            let org = host.strip_suffix(".visualstudio.com")?;
            let rest = match segments.first() {
                Some(first) if first.eq_ignore_ascii_case("DefaultCollection") => &segments[1..],
                _ => segments,
            };
            match rest {
                [project, git, repo] if git == "_git" => azure(org, project, repo),
                // A repository named after its project has no project segment.
                [git, repo] if git == "_git" => azure(org, repo, repo),
                _ => None,
            }
        }
    }
}
