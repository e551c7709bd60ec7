//! Capability traits implemented by every provider adapter.
//!
//! Ids passed to these methods accept the qualified form
//! (`github:issue:12`), a bare number, or `#12`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CreateIssueRequest, CreateMilestoneRequest, CreatePullRequestRequest, Issue, IssueFilter,
    IssueState, IssueUpdate, Milestone, ProviderKind, PullRequest, PullRequestFilter,
    StateFilter,
};

/// Issue tracking.
#[async_trait]
pub trait IssueProvider: Send + Sync {
    /// Create an issue. Not idempotent: calling twice creates two issues.
    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue>;

    async fn get_issue(&self, id: &str) -> Result<Issue>;

    /// All matching issues, most recently updated first. Pagination is
    /// handled internally.
    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>>;

    /// Apply a partial update; `None` fields are left as they are.
    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue>;

    async fn close_issue(&self, id: &str) -> Result<Issue> {
        self.update_issue(id, IssueUpdate::state(IssueState::Closed))
            .await
    }

    async fn reopen_issue(&self, id: &str) -> Result<Issue> {
        self.update_issue(id, IssueUpdate::state(IssueState::Open))
            .await
    }
}

/// Pull requests (merge requests on GitLab).
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    async fn create_pull_request(&self, request: CreatePullRequestRequest) -> Result<PullRequest>;

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest>;

    async fn list_pull_requests(&self, filter: PullRequestFilter) -> Result<Vec<PullRequest>>;
}

/// Milestones (iterations on Azure DevOps).
#[async_trait]
pub trait MilestoneProvider: Send + Sync {
    async fn create_milestone(&self, request: CreateMilestoneRequest) -> Result<Milestone>;

    async fn get_milestone(&self, id: &str) -> Result<Milestone>;

    async fn list_milestones(&self, state: StateFilter) -> Result<Vec<Milestone>>;
}

/// A complete provider adapter.
#[async_trait]
pub trait GitProvider: IssueProvider + PullRequestProvider + MilestoneProvider {
    fn kind(&self) -> ProviderKind;

    /// Whether credentials are present. Cheap, offline where possible, and
    /// never fails.
    async fn is_available(&self) -> bool;
}
