//! GitHub API client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gitprov_core::error::DEFAULT_RATE_LIMIT_BACKOFF_SECS;
use gitprov_core::http::{
    build_client, decode_json, error_from_response, has_next_link, header_str,
    map_transport_error, DEFAULT_TIMEOUT,
};
use gitprov_core::labels::{is_label_exists_error, missing_labels};
use gitprov_core::{
    closing_references, with_closing_references, CreateIssueRequest, CreateMilestoneRequest,
    CreatePullRequestRequest, Error, GitProvider, Issue, IssueFilter, IssueProvider, IssueState,
    IssueUpdate, Label, LabelScheme, LabelSet, Milestone, MilestoneProvider, MilestoneState,
    ProviderKind, PullRequest, PullRequestFilter, PullRequestProvider, PullRequestState,
    PullRequestStateFilter, ResourceId, ResourceKind, Result, RetryPolicy, Sleeper, StateFilter,
    TokioSleeper,
};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::types::{
    AddLabelsBody, CreateIssueBody, CreateLabelBody, CreateMilestoneBody, CreatePullRequestBody,
    GitHubIssue, GitHubLabel, GitHubMilestone, GitHubPullRequest, UpdateIssueBody,
};
use crate::{DEFAULT_CLI_BINARY, DEFAULT_GITHUB_URL};

const SCHEME: LabelScheme = LabelScheme::GITHUB;
const PER_PAGE: &str = "100";

/// Where the API token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubAuth {
    /// A token supplied directly (CI, tests).
    Token(String),
    /// Ask `gh auth token`, once, on first use.
    Cli {
        binary: String,
        hostname: Option<String>,
    },
}

/// REST base URL for github.com or an Enterprise host.
pub fn api_base_url(host: Option<&str>) -> String {
    let host = host.map(|h| h.trim().trim_end_matches('/')).unwrap_or("");
    match host {
        "" | "github.com" | "api.github.com" | "https://github.com" | "https://api.github.com" => {
            DEFAULT_GITHUB_URL.to_string()
        }
        h if h.starts_with("https://") || h.starts_with("http://") => format!("{}/api/v3", h),
        h => format!("https://{}/api/v3", h),
    }
}

/// GitHub adapter.
pub struct GitHubProvider {
    base_url: String,
    owner: String,
    repo: String,
    auth: GitHubAuth,
    cli_token: OnceCell<Option<String>>,
    client: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl GitHubProvider {
    pub fn new(
        base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        auth: GitHubAuth,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            auth,
            cli_token: OnceCell::new(),
            client: build_client(timeout)?,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Client authenticated with an explicit token.
    pub fn with_token(
        base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            base_url,
            owner,
            repo,
            GitHubAuth::Token(token.into()),
            DEFAULT_TIMEOUT,
        )
    }

    /// Client that borrows the credentials of the local `gh` installation.
    pub fn from_cli(
        owner: impl Into<String>,
        repo: impl Into<String>,
        host: Option<&str>,
        cli_binary: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let hostname = host
            .map(|h| {
                h.trim()
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string()
            })
            .filter(|h| !h.is_empty() && h != "github.com");
        let auth = GitHubAuth::Cli {
            binary: cli_binary.unwrap_or(DEFAULT_CLI_BINARY).to_string(),
            hostname,
        };
        Self::new(api_base_url(host), owner, repo, auth, timeout)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &GitHubAuth {
        &self.auth
    }

    fn repo_url(&self, endpoint: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.base_url, self.owner, self.repo, endpoint
        )
    }

    async fn token(&self) -> Result<String> {
        match &self.auth {
            GitHubAuth::Token(token) if !token.trim().is_empty() => Ok(token.clone()),
            GitHubAuth::Token(_) => Err(Error::Authentication(
                "GitHub token is empty".to_string(),
            )),
            GitHubAuth::Cli { binary, hostname } => self
                .cli_token
                .get_or_init(|| fetch_cli_token(binary, hostname.as_deref()))
                .await
                .clone()
                .ok_or_else(|| {
                    Error::Authentication(format!(
                        "no token from `{} auth token`; is the GitHub CLI logged in?",
                        binary
                    ))
                }),
        }
    }

    /// Build request with common headers.
    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.token().await?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.error_for(response).await)
        }
    }

    /// GitHub signals an exhausted quota with 403 and `x-ratelimit-remaining: 0`.
    async fn error_for(&self, response: Response) -> Error {
        let headers = response.headers();
        let exhausted = response.status().as_u16() == 403
            && header_str(headers, "x-ratelimit-remaining") == Some("0");
        if !exhausted {
            return error_from_response("github", response).await;
        }

        let retry_after = header_str(headers, "x-ratelimit-reset")
            .and_then(|reset| reset.parse::<i64>().ok())
            .map(|reset| (reset - Utc::now().timestamp()).max(0) as u64)
            .unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF_SECS);
        let message = response.text().await.unwrap_or_default();
        warn!(retry_after = retry_after, "GitHub API rate limit exhausted");
        Error::RateLimit {
            retry_after,
            message,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = url, "GitHub GET request");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let response = self.send(self.request(Method::GET, url).await?).await?;
                decode_json(response).await
            })
            .await
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<(Vec<T>, bool)> {
        debug!(url = url, "GitHub GET page");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let response = self.send(self.request(Method::GET, url).await?).await?;
                let has_next = has_next_link(response.headers());
                let items = decode_json(response).await?;
                Ok((items, has_next))
            })
            .await
    }

    /// Follow `Link: rel="next"` until exhausted, keeping items `accept`
    /// approves and stopping early at `limit`.
    async fn get_all<T, F>(
        &self,
        url: &str,
        params: &[(&str, String)],
        limit: Option<usize>,
        mut accept: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
        F: FnMut(&T) -> bool + Send,
    {
        let mut results = Vec::new();
        if limit == Some(0) {
            return Ok(results);
        }

        let mut page = 1u32;
        loop {
            let mut page_url = Url::parse(url)
                .map_err(|e| Error::validation("url", format!("invalid URL '{}': {}", url, e)))?;
            page_url
                .query_pairs_mut()
                .extend_pairs(params.iter())
                .append_pair("per_page", PER_PAGE)
                .append_pair("page", &page.to_string());

            let (items, has_next) = self.get_page::<T>(page_url.as_str()).await?;
            for item in items {
                if accept(&item) {
                    results.push(item);
                    if limit.is_some_and(|l| results.len() >= l) {
                        return Ok(results);
                    }
                }
            }

            if !has_next {
                return Ok(results);
            }
            page += 1;
        }
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "GitHub POST request");
        let builder = self.request(Method::POST, url).await?.json(body);
        decode_json(self.send(builder).await?).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "GitHub PATCH request");
        let builder = self.request(Method::PATCH, url).await?.json(body);
        decode_json(self.send(builder).await?).await
    }

    /// Create every label in `labels` the repository does not have yet.
    async fn ensure_labels(&self, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }

        let url = self.repo_url("/labels");
        let existing: Vec<GitHubLabel> = self.get_all(&url, &[], None, |_| true).await?;
        let existing: Vec<String> = existing.into_iter().map(|l| l.name).collect();

        for name in missing_labels(labels, &existing) {
            let body = CreateLabelBody {
                name: name.to_string(),
                color: SCHEME.color_for(name).to_string(),
            };
            match self.post::<GitHubLabel, _>(&url, &body).await {
                Ok(_) => debug!(label = name, "Created label"),
                Err(e) if is_label_exists_error(&e) => debug!(label = name, "Label already exists"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolve a milestone given by number, id or title.
    ///
    /// Qualified ids and `#n` are taken as numbers without a request. A bare
    /// number is checked first, since titles such as `2024` are numeric too.
    async fn milestone_number(&self, key: &str) -> Result<u64> {
        let key = key.trim();
        if key.contains(':') || key.starts_with('#') {
            return ResourceId::resolve(ProviderKind::GitHub, ResourceKind::Milestone, key);
        }
        Ok(self.find_milestone(key).await?.number)
    }

    async fn find_milestone(&self, key: &str) -> Result<GitHubMilestone> {
        let key = key.trim();
        match ResourceId::resolve(ProviderKind::GitHub, ResourceKind::Milestone, key) {
            Ok(number) => match self.fetch_milestone(number).await {
                Err(Error::NotFound { .. }) if key.chars().all(|c| c.is_ascii_digit()) => {
                    debug!(key = key, "No milestone with this number, trying it as a title");
                    self.milestone_by_title(key).await
                }
                other => other,
            },
            Err(e) if key.contains(':') => Err(e),
            Err(_) => self.milestone_by_title(key).await,
        }
    }

    async fn fetch_milestone(&self, number: u64) -> Result<GitHubMilestone> {
        self.get(&self.repo_url(&format!("/milestones/{}", number)))
            .await
            .map_err(|e| e.for_resource("milestone", number))
    }

    async fn milestone_by_title(&self, title: &str) -> Result<GitHubMilestone> {
        let found: Vec<GitHubMilestone> = self
            .get_all(
                &self.repo_url("/milestones"),
                &[("state", "all".to_string())],
                Some(1),
                |m: &GitHubMilestone| m.title.eq_ignore_ascii_case(title),
            )
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("milestone", title))
    }

    async fn fetch_issue(&self, number: u64) -> Result<GitHubIssue> {
        let gh_issue: GitHubIssue = self
            .get(&self.repo_url(&format!("/issues/{}", number)))
            .await
            .map_err(|e| e.for_resource("issue", number))?;
        if gh_issue.pull_request.is_some() {
            return Err(Error::not_found("issue", number.to_string()));
        }
        Ok(gh_issue)
    }
}

async fn fetch_cli_token(binary: &str, hostname: Option<&str>) -> Option<String> {
    let mut command = Command::new(binary);
    command.args(["auth", "token"]);
    if let Some(hostname) = hostname {
        command.args(["--hostname", hostname]);
    }

    match command.output().await {
        Ok(output) if output.status.success() => {
            let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!token.is_empty()).then_some(token)
        }
        Ok(output) => {
            debug!(status = ?output.status, "GitHub CLI returned no token");
            None
        }
        Err(e) => {
            debug!(binary = binary, error = %e, "Failed to run GitHub CLI");
            None
        }
    }
}

// =============================================================================
// Mapping functions: GitHub types -> Unified types
// =============================================================================

fn map_labels(labels: &[GitHubLabel]) -> LabelSet {
    labels
        .iter()
        .map(|l| Label {
            name: l.name.clone(),
            color: l.color.clone(),
            description: l.description.clone(),
        })
        .collect()
}

fn label_names(labels: &[GitHubLabel]) -> impl Iterator<Item = &str> {
    labels.iter().map(|l| l.name.as_str())
}

fn map_issue(gh_issue: &GitHubIssue) -> Issue {
    Issue {
        id: ResourceId::new(ProviderKind::GitHub, ResourceKind::Issue, gh_issue.number),
        provider_id: gh_issue.number.to_string(),
        title: gh_issue.title.clone(),
        body: gh_issue.body.clone(),
        state: if gh_issue.state == "closed" {
            IssueState::Closed
        } else {
            IssueState::Open
        },
        issue_type: SCHEME.label_to_type(label_names(&gh_issue.labels)),
        priority: SCHEME.label_to_priority(label_names(&gh_issue.labels)),
        labels: map_labels(&gh_issue.labels),
        milestone: gh_issue.milestone.as_ref().map(|m| m.number.to_string()),
        url: gh_issue.html_url.clone(),
        created_at: gh_issue.created_at,
        updated_at: gh_issue.updated_at,
    }
}

fn pull_request_state(gh_pr: &GitHubPullRequest) -> (PullRequestState, Option<chrono::DateTime<Utc>>) {
    PullRequestState::resolve(
        gh_pr.merged.unwrap_or(false),
        gh_pr.state == "closed",
        gh_pr.merged_at,
        gh_pr.closed_at.unwrap_or(gh_pr.updated_at),
    )
}

fn map_pull_request(gh_pr: &GitHubPullRequest) -> PullRequest {
    let (state, merged_at) = pull_request_state(gh_pr);
    PullRequest {
        id: ResourceId::new(ProviderKind::GitHub, ResourceKind::PullRequest, gh_pr.number),
        provider_id: gh_pr.number.to_string(),
        title: gh_pr.title.clone(),
        body: gh_pr.body.clone(),
        source_branch: gh_pr.head.ref_name.clone(),
        target_branch: gh_pr.base.ref_name.clone(),
        state,
        draft: gh_pr.draft,
        labels: map_labels(&gh_pr.labels),
        closes_issues: gh_pr
            .body
            .as_deref()
            .map(closing_references)
            .unwrap_or_default(),
        url: gh_pr.html_url.clone(),
        created_at: gh_pr.created_at,
        merged_at,
    }
}

fn map_milestone(gh_milestone: &GitHubMilestone) -> Milestone {
    let (issue_count, closed_issue_count) = Milestone::counts(
        gh_milestone.open_issues + gh_milestone.closed_issues,
        gh_milestone.closed_issues,
    );
    Milestone {
        id: ResourceId::new(
            ProviderKind::GitHub,
            ResourceKind::Milestone,
            gh_milestone.number,
        ),
        provider_id: gh_milestone.number.to_string(),
        title: gh_milestone.title.clone(),
        description: gh_milestone.description.clone(),
        state: if gh_milestone.state == "closed" {
            MilestoneState::Closed
        } else {
            MilestoneState::Open
        },
        due_date: gh_milestone.due_on.map(|d| d.date_naive()),
        issue_count,
        closed_issue_count,
    }
}

fn state_param(state: StateFilter) -> &'static str {
    match state {
        StateFilter::Open => "open",
        StateFilter::Closed => "closed",
        StateFilter::All => "all",
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl IssueProvider for GitHubProvider {
    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue> {
        request.validate()?;

        let labels = SCHEME.labels_for(request.issue_type, request.priority, &request.labels);
        let milestone = match &request.milestone {
            Some(key) => Some(self.milestone_number(key).await?),
            None => None,
        };
        self.ensure_labels(&labels).await?;

        let body = CreateIssueBody {
            title: request.title.trim().to_string(),
            body: request.body,
            labels,
            milestone,
        };
        let gh_issue: GitHubIssue = self.post(&self.repo_url("/issues"), &body).await?;
        Ok(map_issue(&gh_issue))
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        let number = ResourceId::resolve(ProviderKind::GitHub, ResourceKind::Issue, id)?;
        Ok(map_issue(&self.fetch_issue(number).await?))
    }

    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        let mut params = vec![
            ("state", state_param(filter.state.unwrap_or_default()).to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];
        if let Some(label) = &filter.label {
            params.push(("labels", label.clone()));
        }
        if let Some(milestone) = &filter.milestone {
            params.push(("milestone", self.milestone_number(milestone).await?.to_string()));
        }

        let issue_type = filter.issue_type;
        let gh_issues: Vec<GitHubIssue> = self
            .get_all(
                &self.repo_url("/issues"),
                &params,
                filter.limit,
                |i: &GitHubIssue| {
                    i.pull_request.is_none()
                        && issue_type.map_or(true, |t| SCHEME.label_to_type(label_names(&i.labels)) == t)
                },
            )
            .await?;
        Ok(gh_issues.iter().map(map_issue).collect())
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        update.validate()?;
        let number = ResourceId::resolve(ProviderKind::GitHub, ResourceKind::Issue, id)?;

        let labels = if update.touches_labels() {
            let current = self.fetch_issue(number).await?;
            let current: Vec<String> = current.labels.into_iter().map(|l| l.name).collect();
            let labels = SCHEME.relabel(
                &current,
                update.issue_type,
                update.priority,
                update.labels.as_deref(),
            );
            self.ensure_labels(&labels).await?;
            Some(labels)
        } else {
            None
        };
        let milestone = match &update.milestone {
            Some(key) => Some(self.milestone_number(key).await?),
            None => None,
        };

        let body = UpdateIssueBody {
            title: update.title.map(|t| t.trim().to_string()),
            body: update.body,
            state: update.state.map(|s| match s {
                IssueState::Open => "open".to_string(),
                IssueState::Closed => "closed".to_string(),
            }),
            labels,
            milestone,
        };
        let gh_issue: GitHubIssue = self
            .patch(&self.repo_url(&format!("/issues/{}", number)), &body)
            .await
            .map_err(|e| e.for_resource("issue", number))?;
        Ok(map_issue(&gh_issue))
    }
}

#[async_trait]
impl PullRequestProvider for GitHubProvider {
    async fn create_pull_request(&self, request: CreatePullRequestRequest) -> Result<PullRequest> {
        request.validate()?;
        let closes = request
            .closes
            .iter()
            .map(|c| ResourceId::resolve(ProviderKind::GitHub, ResourceKind::Issue, c))
            .collect::<Result<Vec<u64>>>()?;

        let body = CreatePullRequestBody {
            title: request.title.trim().to_string(),
            body: with_closing_references(request.body, &closes),
            head: request.source_branch,
            base: request.target_branch,
            draft: request.draft,
        };
        let mut gh_pr: GitHubPullRequest = self.post(&self.repo_url("/pulls"), &body).await?;

        if !request.labels.is_empty() {
            let labels: Vec<String> = request.labels.iter().map(|l| l.trim().to_string()).collect();
            self.ensure_labels(&labels).await?;
            let url = self.repo_url(&format!("/issues/{}/labels", gh_pr.number));
            gh_pr.labels = self.post(&url, &AddLabelsBody { labels }).await?;
        }

        Ok(map_pull_request(&gh_pr))
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest> {
        let number = ResourceId::resolve(ProviderKind::GitHub, ResourceKind::PullRequest, id)?;
        let gh_pr: GitHubPullRequest = self
            .get(&self.repo_url(&format!("/pulls/{}", number)))
            .await
            .map_err(|e| e.for_resource("pull request", number))?;
        Ok(map_pull_request(&gh_pr))
    }

    async fn list_pull_requests(&self, filter: PullRequestFilter) -> Result<Vec<PullRequest>> {
        let state = filter.state.unwrap_or_default();
        let mut params = vec![
            (
                "state",
                match state {
                    PullRequestStateFilter::Open => "open",
                    PullRequestStateFilter::Closed | PullRequestStateFilter::Merged => "closed",
                    PullRequestStateFilter::All => "all",
                }
                .to_string(),
            ),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];
        if let Some(source) = &filter.source_branch {
            params.push(("head", format!("{}:{}", self.owner, source)));
        }
        if let Some(target) = &filter.target_branch {
            params.push(("base", target.clone()));
        }

        let label = filter.label.clone();
        let gh_prs: Vec<GitHubPullRequest> = self
            .get_all(
                &self.repo_url("/pulls"),
                &params,
                filter.limit,
                |pr: &GitHubPullRequest| {
                    state.matches(pull_request_state(pr).0)
                        && label.as_deref().map_or(true, |wanted| {
                            pr.labels.iter().any(|l| l.name.eq_ignore_ascii_case(wanted))
                        })
                },
            )
            .await?;
        Ok(gh_prs.iter().map(map_pull_request).collect())
    }
}

#[async_trait]
impl MilestoneProvider for GitHubProvider {
    async fn create_milestone(&self, request: CreateMilestoneRequest) -> Result<Milestone> {
        request.validate()?;
        let body = CreateMilestoneBody {
            title: request.title.trim().to_string(),
            description: request.description,
            due_on: request.due_date.map(|d| format!("{}T00:00:00Z", d)),
        };
        let gh_milestone: GitHubMilestone =
            self.post(&self.repo_url("/milestones"), &body).await?;
        Ok(map_milestone(&gh_milestone))
    }

    async fn get_milestone(&self, id: &str) -> Result<Milestone> {
        Ok(map_milestone(&self.find_milestone(id).await?))
    }

    async fn list_milestones(&self, state: StateFilter) -> Result<Vec<Milestone>> {
        let gh_milestones: Vec<GitHubMilestone> = self
            .get_all(
                &self.repo_url("/milestones"),
                &[("state", state_param(state).to_string())],
                None,
                |_| true,
            )
            .await?;
        Ok(gh_milestones.iter().map(map_milestone).collect())
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn is_available(&self) -> bool {
        match &self.auth {
            GitHubAuth::Token(token) => !token.trim().is_empty(),
            GitHubAuth::Cli { binary, .. } => {
                which::which(binary).is_ok() && self.token().await.is_ok()
            }
        }
    }
}
