//! GitLab API client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gitprov_core::http::{
    build_client, decode_json, error_from_response, header_str, map_transport_error,
    DEFAULT_TIMEOUT,
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
use tracing::debug;

use crate::types::{
    CreateIssueBody, CreateLabelBody, CreateMergeRequestBody, CreateMilestoneBody, GitLabIssue,
    GitLabLabel, GitLabMergeRequest, GitLabMilestone, UpdateIssueBody,
};
use crate::DEFAULT_GITLAB_URL;

const SCHEME: LabelScheme = LabelScheme::GITLAB;
const PER_PAGE: &str = "100";

/// Instance URL from a configured host (`gitlab.example.com`,
/// `https://gitlab.example.com/`, or nothing for gitlab.com).
pub fn instance_url(host: Option<&str>) -> String {
    match host.map(|h| h.trim().trim_end_matches('/')) {
        None | Some("") => DEFAULT_GITLAB_URL.to_string(),
        Some(h) if h.starts_with("https://") || h.starts_with("http://") => h.to_string(),
        Some(h) => format!("https://{}", h),
    }
}

/// Project reference as it appears in a URL path: numeric ids stay as-is,
/// `group/sub/project` paths are percent-encoded.
fn encode_project(project: &str) -> String {
    project.trim().trim_matches('/').replace('/', "%2F")
}

/// GitLab adapter.
pub struct GitLabProvider {
    base_url: String,
    project: String,
    token: Option<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl GitLabProvider {
    /// Create a new GitLab provider.
    ///
    /// A missing token is not an error here; requests fail with
    /// `Authentication` instead.
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project: project.into(),
            token: token.filter(|t| !t.trim().is_empty()),
            client: build_client(timeout)?,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Create a new GitLab provider with a custom base URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        project: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Self::new(base_url, project, Some(token.into()), DEFAULT_TIMEOUT)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Get the project API URL for a given endpoint.
    fn project_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v4/projects/{}{}",
            self.base_url,
            encode_project(&self.project),
            endpoint
        )
    }

    /// Build request with common headers.
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| {
            Error::Authentication("no GitLab token configured (set GITLAB_TOKEN)".to_string())
        })?;
        Ok(self
            .client
            .request(method, url)
            .header("PRIVATE-TOKEN", token))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response("gitlab", response).await)
        }
    }

    /// Make an authenticated GET request with typed deserialization.
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = url, "GitLab GET request");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let response = self.send(self.request(Method::GET, url)?).await?;
                decode_json(response).await
            })
            .await
    }

    /// One page plus the number of the next one, from `x-next-page`.
    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<(Vec<T>, Option<u32>)> {
        debug!(url = url, "GitLab GET page");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let response = self.send(self.request(Method::GET, url)?).await?;
                let next_page = header_str(response.headers(), "x-next-page")
                    .and_then(|p| p.trim().parse::<u32>().ok());
                let items = decode_json(response).await?;
                Ok((items, next_page))
            })
            .await
    }

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

            let (items, next_page) = self.get_page::<T>(page_url.as_str()).await?;
            for item in items {
                if accept(&item) {
                    results.push(item);
                    if limit.is_some_and(|l| results.len() >= l) {
                        return Ok(results);
                    }
                }
            }

            match next_page {
                Some(next) if next > page => page = next,
                _ => return Ok(results),
            }
        }
    }

    /// Make an authenticated POST request.
    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "GitLab POST request");
        let builder = self.request(Method::POST, url)?.json(body);
        decode_json(self.send(builder).await?).await
    }

    /// Make an authenticated PUT request.
    async fn put<T: DeserializeOwned, B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "GitLab PUT request");
        let builder = self.request(Method::PUT, url)?.json(body);
        decode_json(self.send(builder).await?).await
    }

    /// Create every label in `labels` the project does not have yet.
    /// GitLab answers 409 for a label that already exists.
    async fn ensure_labels(&self, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }

        let url = self.project_url("/labels");
        let existing: Vec<GitLabLabel> = self.get_all(&url, &[], None, |_| true).await?;
        let existing: Vec<String> = existing.into_iter().map(|l| l.name).collect();

        for name in missing_labels(labels, &existing) {
            let body = CreateLabelBody {
                name: name.to_string(),
                color: format!("#{}", SCHEME.color_for(name)),
            };
            match self.post::<GitLabLabel, _>(&url, &body).await {
                Ok(_) => debug!(label = name, "Created label"),
                Err(e) if is_label_exists_error(&e) => debug!(label = name, "Label already exists"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn fetch_milestone(&self, key: &str) -> Result<GitLabMilestone> {
        match ResourceId::resolve(ProviderKind::GitLab, ResourceKind::Milestone, key) {
            Ok(id) => self
                .get(&self.project_url(&format!("/milestones/{}", id)))
                .await
                .map_err(|e| e.for_resource("milestone", id)),
            Err(e) if key.contains(':') => Err(e),
            Err(_) => {
                let title = key.trim();
                let found: Vec<GitLabMilestone> = self
                    .get_all(
                        &self.project_url("/milestones"),
                        &[("title", title.to_string())],
                        Some(1),
                        |m: &GitLabMilestone| m.title.eq_ignore_ascii_case(title),
                    )
                    .await?;
                found
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::not_found("milestone", title))
            }
        }
    }

    /// Total and closed issue counts of a milestone.
    async fn milestone_counts(&self, milestone_id: u64) -> Result<(u32, u32)> {
        let issues: Vec<GitLabIssue> = self
            .get_all(
                &self.project_url(&format!("/milestones/{}/issues", milestone_id)),
                &[],
                None,
                |_| true,
            )
            .await?;
        let closed = issues.iter().filter(|i| i.state == "closed").count();
        Ok((issues.len() as u32, closed as u32))
    }

    async fn map_milestone_with_counts(&self, gl_milestone: &GitLabMilestone) -> Result<Milestone> {
        let (total, closed) = self.milestone_counts(gl_milestone.id).await?;
        Ok(map_milestone(gl_milestone, total, closed))
    }

    async fn fetch_issue(&self, iid: u64) -> Result<GitLabIssue> {
        self.get(&self.project_url(&format!("/issues/{}", iid)))
            .await
            .map_err(|e| e.for_resource("issue", iid))
    }
}

// =============================================================================
// Mapping functions: GitLab types -> Unified types
// =============================================================================

fn map_labels(labels: &[String]) -> LabelSet {
    labels.iter().map(Label::new).collect()
}

fn map_issue(gl_issue: &GitLabIssue) -> Issue {
    let names = || gl_issue.labels.iter().map(String::as_str);
    Issue {
        id: ResourceId::new(ProviderKind::GitLab, ResourceKind::Issue, gl_issue.iid),
        provider_id: gl_issue.iid.to_string(),
        title: gl_issue.title.clone(),
        body: gl_issue.description.clone(),
        state: if gl_issue.state == "closed" {
            IssueState::Closed
        } else {
            IssueState::Open
        },
        issue_type: SCHEME.label_to_type(names()),
        priority: SCHEME.label_to_priority(names()),
        labels: map_labels(&gl_issue.labels),
        milestone: gl_issue.milestone.as_ref().map(|m| m.id.to_string()),
        url: gl_issue.web_url.clone(),
        created_at: gl_issue.created_at,
        updated_at: gl_issue.updated_at,
    }
}

fn merge_request_state(
    gl_mr: &GitLabMergeRequest,
) -> (PullRequestState, Option<chrono::DateTime<chrono::Utc>>) {
    PullRequestState::resolve(
        gl_mr.state == "merged",
        gl_mr.state == "closed",
        gl_mr.merged_at,
        gl_mr.closed_at.unwrap_or(gl_mr.updated_at),
    )
}

fn map_merge_request(gl_mr: &GitLabMergeRequest) -> PullRequest {
    let (state, merged_at) = merge_request_state(gl_mr);
    PullRequest {
        id: ResourceId::new(ProviderKind::GitLab, ResourceKind::PullRequest, gl_mr.iid),
        provider_id: gl_mr.iid.to_string(),
        title: gl_mr.title.clone(),
        body: gl_mr.description.clone(),
        source_branch: gl_mr.source_branch.clone(),
        target_branch: gl_mr.target_branch.clone(),
        state,
        draft: gl_mr.draft || gl_mr.work_in_progress,
        labels: map_labels(&gl_mr.labels),
        closes_issues: gl_mr
            .description
            .as_deref()
            .map(closing_references)
            .unwrap_or_default(),
        url: gl_mr.web_url.clone(),
        created_at: gl_mr.created_at,
        merged_at,
    }
}

fn map_milestone(gl_milestone: &GitLabMilestone, total: u32, closed: u32) -> Milestone {
    let (issue_count, closed_issue_count) = Milestone::counts(total, closed);
    Milestone {
        id: ResourceId::new(ProviderKind::GitLab, ResourceKind::Milestone, gl_milestone.id),
        provider_id: gl_milestone.id.to_string(),
        title: gl_milestone.title.clone(),
        description: gl_milestone.description.clone(),
        state: if gl_milestone.state == "closed" {
            MilestoneState::Closed
        } else {
            MilestoneState::Open
        },
        due_date: gl_milestone.due_date,
        issue_count,
        closed_issue_count,
    }
}

fn draft_title(title: &str, draft: bool) -> String {
    let title = title.trim();
    let lower = title.to_ascii_lowercase();
    if draft && !lower.starts_with("draft:") && !lower.starts_with("[draft]") {
        format!("Draft: {}", title)
    } else {
        title.to_string()
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl IssueProvider for GitLabProvider {
    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue> {
        request.validate()?;

        let labels = SCHEME.labels_for(request.issue_type, request.priority, &request.labels);
        let milestone_id = match &request.milestone {
            Some(key) => Some(self.fetch_milestone(key).await?.id),
            None => None,
        };
        self.ensure_labels(&labels).await?;

        let body = CreateIssueBody {
            title: request.title.trim().to_string(),
            description: request.body,
            labels: labels.join(","),
            milestone_id,
        };
        let gl_issue: GitLabIssue = self.post(&self.project_url("/issues"), &body).await?;
        Ok(map_issue(&gl_issue))
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        let iid = ResourceId::resolve(ProviderKind::GitLab, ResourceKind::Issue, id)?;
        Ok(map_issue(&self.fetch_issue(iid).await?))
    }

    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        let state = match filter.state.unwrap_or_default() {
            StateFilter::Open => "opened",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        };
        let mut params = vec![
            ("state", state.to_string()),
            ("order_by", "updated_at".to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(label) = &filter.label {
            params.push(("labels", label.clone()));
        }
        if let Some(milestone) = &filter.milestone {
            // The issues endpoint filters milestones by title.
            params.push(("milestone", self.fetch_milestone(milestone).await?.title));
        }

        let issue_type = filter.issue_type;
        let gl_issues: Vec<GitLabIssue> = self
            .get_all(
                &self.project_url("/issues"),
                &params,
                filter.limit,
                |i: &GitLabIssue| {
                    issue_type.map_or(true, |t| {
                        SCHEME.label_to_type(i.labels.iter().map(String::as_str)) == t
                    })
                },
            )
            .await?;
        Ok(gl_issues.iter().map(map_issue).collect())
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        update.validate()?;
        let iid = ResourceId::resolve(ProviderKind::GitLab, ResourceKind::Issue, id)?;

        let labels = if update.touches_labels() {
            let current = self.fetch_issue(iid).await?;
            let labels = SCHEME.relabel(
                &current.labels,
                update.issue_type,
                update.priority,
                update.labels.as_deref(),
            );
            self.ensure_labels(&labels).await?;
            Some(labels.join(","))
        } else {
            None
        };
        let milestone_id = match &update.milestone {
            Some(key) => Some(self.fetch_milestone(key).await?.id),
            None => None,
        };

        let body = UpdateIssueBody {
            title: update.title.map(|t| t.trim().to_string()),
            description: update.body,
            state_event: update.state.map(|s| match s {
                IssueState::Open => "reopen".to_string(),
                IssueState::Closed => "close".to_string(),
            }),
            labels,
            milestone_id,
        };
        let gl_issue: GitLabIssue = self
            .put(&self.project_url(&format!("/issues/{}", iid)), &body)
            .await
            .map_err(|e| e.for_resource("issue", iid))?;
        Ok(map_issue(&gl_issue))
    }
}

#[async_trait]
impl PullRequestProvider for GitLabProvider {
    async fn create_pull_request(&self, request: CreatePullRequestRequest) -> Result<PullRequest> {
        request.validate()?;
        let closes = request
            .closes
            .iter()
            .map(|c| ResourceId::resolve(ProviderKind::GitLab, ResourceKind::Issue, c))
            .collect::<Result<Vec<u64>>>()?;

        let labels: Vec<String> = request.labels.iter().map(|l| l.trim().to_string()).collect();
        self.ensure_labels(&labels).await?;

        let body = CreateMergeRequestBody {
            title: draft_title(&request.title, request.draft),
            description: with_closing_references(request.body, &closes),
            source_branch: request.source_branch,
            target_branch: request.target_branch,
            labels: (!labels.is_empty()).then(|| labels.join(",")),
        };
        let gl_mr: GitLabMergeRequest = self
            .post(&self.project_url("/merge_requests"), &body)
            .await?;
        Ok(map_merge_request(&gl_mr))
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest> {
        let iid = ResourceId::resolve(ProviderKind::GitLab, ResourceKind::PullRequest, id)?;
        let gl_mr: GitLabMergeRequest = self
            .get(&self.project_url(&format!("/merge_requests/{}", iid)))
            .await
            .map_err(|e| e.for_resource("merge request", iid))?;
        Ok(map_merge_request(&gl_mr))
    }

    async fn list_pull_requests(&self, filter: PullRequestFilter) -> Result<Vec<PullRequest>> {
        let state = filter.state.unwrap_or_default();
        let mut params = vec![
            (
                "state",
                match state {
                    PullRequestStateFilter::Open => "opened",
                    PullRequestStateFilter::Closed => "closed",
                    PullRequestStateFilter::Merged => "merged",
                    PullRequestStateFilter::All => "all",
                }
                .to_string(),
            ),
            ("order_by", "updated_at".to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(source) = &filter.source_branch {
            params.push(("source_branch", source.clone()));
        }
        if let Some(target) = &filter.target_branch {
            params.push(("target_branch", target.clone()));
        }
        if let Some(label) = &filter.label {
            params.push(("labels", label.clone()));
        }

        let gl_mrs: Vec<GitLabMergeRequest> = self
            .get_all(
                &self.project_url("/merge_requests"),
                &params,
                filter.limit,
                |mr: &GitLabMergeRequest| state.matches(merge_request_state(mr).0),
            )
            .await?;
        Ok(gl_mrs.iter().map(map_merge_request).collect())
    }
}

#[async_trait]
impl MilestoneProvider for GitLabProvider {
    async fn create_milestone(&self, request: CreateMilestoneRequest) -> Result<Milestone> {
        request.validate()?;
        let body = CreateMilestoneBody {
            title: request.title.trim().to_string(),
            description: request.description,
            due_date: request.due_date,
        };
        let gl_milestone: GitLabMilestone =
            self.post(&self.project_url("/milestones"), &body).await?;
        Ok(map_milestone(&gl_milestone, 0, 0))
    }

    async fn get_milestone(&self, id: &str) -> Result<Milestone> {
        let gl_milestone = self.fetch_milestone(id).await?;
        self.map_milestone_with_counts(&gl_milestone).await
    }

    async fn list_milestones(&self, state: StateFilter) -> Result<Vec<Milestone>> {
        let mut params = Vec::new();
        match state {
            StateFilter::Open => params.push(("state", "active".to_string())),
            StateFilter::Closed => params.push(("state", "closed".to_string())),
            StateFilter::All => {}
        }

        let gl_milestones: Vec<GitLabMilestone> = self
            .get_all(&self.project_url("/milestones"), &params, None, |_| true)
            .await?;

        let mut milestones = Vec::with_capacity(gl_milestones.len());
        for gl_milestone in &gl_milestones {
            milestones.push(self.map_milestone_with_counts(gl_milestone).await?);
        }
        Ok(milestones)
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn is_available(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitprov_core::{IssueType, Priority};

    fn ts(s: &str) -> chrono::DateTime<chrono::Utc> {
        s.parse().unwrap()
    }

    fn merge_request(state: &str, merged_at: Option<&str>) -> GitLabMergeRequest {
        GitLabMergeRequest {
            id: 1,
            iid: 5,
            title: "Add feature".to_string(),
            description: Some("Closes #9".to_string()),
            state: state.to_string(),
            source_branch: "feature".to_string(),
            target_branch: "main".to_string(),
            labels: vec![],
            draft: false,
            work_in_progress: false,
            merged_at: merged_at.map(ts),
            closed_at: None,
            web_url: "https://gitlab.com/g/p/-/merge_requests/5".to_string(),
            created_at: ts("2024-01-01T00:00:00Z"),
            updated_at: ts("2024-01-02T00:00:00Z"),
        }
    }

    #[test]
    fn test_instance_url() {
        assert_eq!(instance_url(None), "https://gitlab.com");
        assert_eq!(
            instance_url(Some("gitlab.example.com")),
            "https://gitlab.example.com"
        );
        assert_eq!(
            instance_url(Some("http://10.0.0.5:8080/")),
            "http://10.0.0.5:8080"
        );
    }

    #[test]
    fn test_encode_project() {
        assert_eq!(encode_project("123"), "123");
        assert_eq!(encode_project("group/sub/app"), "group%2Fsub%2Fapp");
        assert_eq!(encode_project("/group/app/"), "group%2Fapp");
    }

    #[test]
    fn test_map_issue_scoped_priority_and_epic() {
        let gl_issue = GitLabIssue {
            id: 1,
            iid: 42,
            title: "Roadmap".to_string(),
            description: None,
            state: "opened".to_string(),
            labels: vec!["Epic".to_string(), "priority::2".to_string()],
            milestone: None,
            web_url: "https://gitlab.com/g/p/-/issues/42".to_string(),
            created_at: ts("2024-01-01T00:00:00Z"),
            updated_at: ts("2024-01-02T00:00:00Z"),
        };

        let issue = map_issue(&gl_issue);
        assert_eq!(issue.id.to_string(), "gitlab:issue:42");
        assert_eq!(issue.issue_type, IssueType::Epic);
        assert_eq!(issue.priority, Some(Priority::P2));
        assert_eq!(issue.state, IssueState::Open);
    }

    #[test]
    fn test_map_merge_request_states() {
        let merged = map_merge_request(&merge_request("merged", Some("2024-01-03T00:00:00Z")));
        assert_eq!(merged.state, PullRequestState::Merged);
        assert!(merged.merged_at.is_some());
        assert_eq!(merged.closes_issues, vec![9]);

        let merged_without_timestamp = map_merge_request(&merge_request("merged", None));
        assert_eq!(merged_without_timestamp.state, PullRequestState::Merged);
        assert!(merged_without_timestamp.merged_at.is_some());

        let closed = map_merge_request(&merge_request("closed", None));
        assert_eq!(closed.state, PullRequestState::Closed);
        assert!(closed.merged_at.is_none());

        let locked = map_merge_request(&merge_request("locked", None));
        assert_eq!(locked.state, PullRequestState::Open);
    }

    #[test]
    fn test_map_milestone_clamps_counts() {
        let milestone = map_milestone(
            &GitLabMilestone {
                id: 77,
                iid: Some(3),
                title: "Sprint 3".to_string(),
                description: None,
                state: "closed".to_string(),
                due_date: None,
            },
            2,
            5,
        );
        assert_eq!(milestone.state, MilestoneState::Closed);
        assert_eq!(milestone.issue_count, 2);
        assert_eq!(milestone.closed_issue_count, 2);
        assert_eq!(milestone.provider_id, "77");
    }

    #[test]
    fn test_draft_title() {
        assert_eq!(draft_title("Add x", true), "Draft: Add x");
        assert_eq!(draft_title("Draft: Add x", true), "Draft: Add x");
        assert_eq!(draft_title(" Add x ", false), "Add x");
    }

    #[tokio::test]
    async fn test_missing_token_fails_on_use_not_construction() {
        let provider =
            GitLabProvider::new("http://127.0.0.1:9", "123", None, DEFAULT_TIMEOUT).unwrap();
        assert!(!provider.is_available().await);
        let err = provider.get_issue("1").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    mod integration {
        use super::*;
        use httpmock::prelude::*;
        use serde_json::json;

        fn create_test_provider(server: &MockServer) -> GitLabProvider {
            GitLabProvider::with_base_url(server.base_url(), "123", "test-token")
                .unwrap()
                .with_retry_policy(RetryPolicy::new(3, Duration::ZERO))
        }

        fn issue_json(iid: u64, state: &str, labels: &[&str]) -> serde_json::Value {
            json!({
                "id": 1000 + iid,
                "iid": iid,
                "title": format!("Issue {}", iid),
                "description": "Body",
                "state": state,
                "labels": labels,
                "web_url": format!("https://gitlab.com/group/project/-/issues/{}", iid),
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-02T00:00:00Z"
            })
        }

        #[tokio::test]
        async fn test_get_issue() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/projects/123/issues/42")
                    .header("PRIVATE-TOKEN", "test-token");
                then.status(200)
                    .json_body(issue_json(42, "closed", &["bug", "priority::1"]));
            });

            let provider = create_test_provider(&server);
            let issue = provider.get_issue("gitlab:issue:42").await.unwrap();

            assert_eq!(issue.state, IssueState::Closed);
            assert_eq!(issue.issue_type, IssueType::Bug);
            assert_eq!(issue.priority, Some(Priority::P1));
        }

        #[tokio::test]
        async fn test_list_issues_follows_next_page_header() {
            let server = MockServer::start();
            let page1 = server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/projects/123/issues")
                    .query_param("state", "opened")
                    .query_param("order_by", "updated_at")
                    .query_param("page", "1");
                then.status(200)
                    .header("x-next-page", "2")
                    .json_body(json!([issue_json(3, "opened", &["task"])]));
            });
            let page2 = server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/projects/123/issues")
                    .query_param("page", "2");
                then.status(200)
                    .header("x-next-page", "")
                    .json_body(json!([issue_json(1, "opened", &["Epic"])]));
            });

            let provider = create_test_provider(&server);
            let issues = provider.list_issues(IssueFilter::default()).await.unwrap();

            page1.assert_calls(1);
            page2.assert_calls(1);
            assert_eq!(issues.len(), 2);
            assert_eq!(issues[1].issue_type, IssueType::Epic);
        }

        #[tokio::test]
        async fn test_create_issue_creates_missing_labels_once() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/labels");
                then.status(200).json_body(json!([{"id": 1, "name": "bug"}]));
            });
            let create_label = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/123/labels")
                    .body_includes("\"name\":\"priority::1\"")
                    .body_includes("\"color\":\"#b60205\"");
                then.status(201).json_body(json!({"id": 2, "name": "priority::1"}));
            });
            let create_issue = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/123/issues")
                    .body_includes("\"labels\":\"bug,priority::1\"");
                then.status(201)
                    .json_body(issue_json(99, "opened", &["bug", "priority::1"]));
            });

            let provider = create_test_provider(&server);
            let mut request = CreateIssueRequest::new("Crash on start", IssueType::Bug);
            request.priority = Some(Priority::P1);
            let issue = provider.create_issue(request).await.unwrap();

            create_label.assert_calls(1);
            create_issue.assert_calls(1);
            assert_eq!(issue.issue_type, IssueType::Bug);
            assert_eq!(issue.priority, Some(Priority::P1));
        }

        #[tokio::test]
        async fn test_label_conflict_is_tolerated() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/labels");
                then.status(200).json_body(json!([]));
            });
            server.mock(|when, then| {
                when.method(POST).path("/api/v4/projects/123/labels");
                then.status(409).json_body(json!({"message": "Label already exists"}));
            });
            let create_issue = server.mock(|when, then| {
                when.method(POST).path("/api/v4/projects/123/issues");
                then.status(201).json_body(issue_json(7, "opened", &["task"]));
            });

            let provider = create_test_provider(&server);
            provider
                .create_issue(CreateIssueRequest::new("Chore", IssueType::Task))
                .await
                .unwrap();
            create_issue.assert_calls(1);
        }

        #[tokio::test]
        async fn test_close_issue_uses_state_event() {
            let server = MockServer::start();
            let update = server.mock(|when, then| {
                when.method(PUT)
                    .path("/api/v4/projects/123/issues/42")
                    .body_includes("\"state_event\":\"close\"");
                then.status(200).json_body(issue_json(42, "closed", &[]));
            });

            let provider = create_test_provider(&server);
            let issue = provider.close_issue("#42").await.unwrap();

            update.assert_calls(1);
            assert_eq!(issue.state, IssueState::Closed);
        }

        #[tokio::test]
        async fn test_update_priority_keeps_other_labels() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/issues/5");
                then.status(200)
                    .json_body(issue_json(5, "opened", &["bug", "priority::3", "backend"]));
            });
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/labels");
                then.status(200).json_body(json!([
                    {"name": "bug"}, {"name": "priority::1"}, {"name": "backend"}
                ]));
            });
            let update = server.mock(|when, then| {
                when.method(PUT)
                    .path("/api/v4/projects/123/issues/5")
                    .body_includes("\"labels\":\"bug,priority::1,backend\"");
                then.status(200)
                    .json_body(issue_json(5, "opened", &["bug", "priority::1", "backend"]));
            });

            let provider = create_test_provider(&server);
            let issue = provider
                .update_issue(
                    "5",
                    IssueUpdate {
                        priority: Some(Priority::P1),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            update.assert_calls(1);
            assert_eq!(issue.priority, Some(Priority::P1));
        }

        #[tokio::test]
        async fn test_create_merge_request() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/123/merge_requests")
                    .body_includes("\"title\":\"Draft: Refactor\"")
                    .body_includes("Closes #4")
                    .body_includes("\"source_branch\":\"refactor\"");
                then.status(201).json_body(json!({
                    "id": 500,
                    "iid": 12,
                    "title": "Draft: Refactor",
                    "description": "Closes #4",
                    "state": "opened",
                    "source_branch": "refactor",
                    "target_branch": "main",
                    "draft": true,
                    "web_url": "https://gitlab.com/group/project/-/merge_requests/12",
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z"
                }));
            });

            let provider = create_test_provider(&server);
            let pr = provider
                .create_pull_request(CreatePullRequestRequest {
                    title: "Refactor".to_string(),
                    body: None,
                    source_branch: "refactor".to_string(),
                    target_branch: "main".to_string(),
                    draft: true,
                    labels: vec![],
                    closes: vec!["gitlab:issue:4".to_string()],
                })
                .await
                .unwrap();

            create.assert_calls(1);
            assert!(pr.draft);
            assert_eq!(pr.state, PullRequestState::Open);
            assert_eq!(pr.closes_issues, vec![4]);
            assert_eq!(pr.id.to_string(), "gitlab:pr:12");
        }

        #[tokio::test]
        async fn test_get_milestone_counts_issues() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/milestones/77");
                then.status(200).json_body(json!({
                    "id": 77, "iid": 2, "title": "v1.0", "state": "active",
                    "due_date": "2024-06-30"
                }));
            });
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/milestones/77/issues");
                then.status(200).json_body(json!([
                    issue_json(1, "closed", &[]),
                    issue_json(2, "opened", &[]),
                    issue_json(3, "closed", &[])
                ]));
            });

            let provider = create_test_provider(&server);
            let milestone = provider.get_milestone("77").await.unwrap();

            assert_eq!(milestone.issue_count, 3);
            assert_eq!(milestone.closed_issue_count, 2);
            assert_eq!(milestone.state, MilestoneState::Open);
            assert_eq!(milestone.due_date.unwrap().to_string(), "2024-06-30");
        }

        #[tokio::test]
        async fn test_rate_limit_honours_retry_after() {
            let server = MockServer::start();
            let limited = server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/merge_requests/1");
                then.status(429).header("Retry-After", "7");
            });

            let provider = create_test_provider(&server).with_retry_policy(RetryPolicy::none());
            let err = provider.get_pull_request("1").await.unwrap_err();

            limited.assert_calls(1);
            assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        }

        #[tokio::test]
        async fn test_forbidden_is_authentication() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/123/milestones");
                then.status(403).json_body(json!({"message": "403 Forbidden"}));
            });

            let provider = create_test_provider(&server);
            let err = provider.list_milestones(StateFilter::All).await.unwrap_err();
            assert!(matches!(err, Error::Authentication(_)));
        }
    }
}
