//! Azure DevOps API client implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gitprov_core::config::{DEFAULT_AZURE_API_VERSION, DEFAULT_AZURE_CLOSED_STATE};
use gitprov_core::http::{
    build_client, decode_json, error_from_response, map_transport_error, DEFAULT_TIMEOUT,
};
use gitprov_core::labels::is_label_exists_error;
use gitprov_core::{
    closing_references, CreateIssueRequest, CreateMilestoneRequest, CreatePullRequestRequest,
    Error, GitProvider, Issue, IssueFilter, IssueProvider, IssueState, IssueType, IssueUpdate,
    Label, LabelSet, Milestone, MilestoneProvider, MilestoneState, ProviderKind, PullRequest,
    PullRequestFilter, PullRequestProvider, PullRequestState, PullRequestStateFilter, ResourceId,
    ResourceKind, Result, RetryPolicy, Sleeper, StateFilter, TokioSleeper, WorkItemTypeMap,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{
    AzureIteration, AzureLabel, AzurePullRequest, AzureWorkItem, CreateIterationBody,
    CreateLabelBody, CreatePullRequestBody, IterationAttributes, ListResponse, PatchOperation,
    ResourceRef, WiqlQuery, WiqlResult, WorkItemBatchRequest, WORK_ITEM_FIELDS,
};
use crate::{DEFAULT_AZURE_DEVOPS_URL, REOPEN_STATE};

const TYPES: WorkItemTypeMap = WorkItemTypeMap;
const JSON_PATCH: &str = "application/json-patch+json";

/// Work items per batch request; the API rejects more.
const BATCH_SIZE: usize = 200;
const PR_PAGE_SIZE: usize = 100;

/// States that read as closed regardless of the process template.
const CLOSED_STATES: &[&str] = &["Closed", "Done", "Resolved", "Removed"];

const FIELD_TITLE: &str = "System.Title";
const FIELD_DESCRIPTION: &str = "System.Description";
const FIELD_STATE: &str = "System.State";
const FIELD_TAGS: &str = "System.Tags";
const FIELD_ITERATION: &str = "System.IterationPath";
const FIELD_PRIORITY: &str = "Microsoft.VSTS.Common.Priority";

/// Collection URL from a configured host; nothing means dev.azure.com.
pub fn collection_url(host: Option<&str>) -> String {
    match host.map(|h| h.trim().trim_end_matches('/')) {
        None | Some("") => DEFAULT_AZURE_DEVOPS_URL.to_string(),
        Some(h) if h.starts_with("https://") || h.starts_with("http://") => h.to_string(),
        Some(h) => format!("https://{}", h),
    }
}

/// Characters escaped in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment.trim(), PATH_SEGMENT).to_string()
}

/// Quote a WIQL string literal.
fn wiql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

fn branch_name(reference: &str) -> String {
    reference
        .strip_prefix("refs/heads/")
        .unwrap_or(reference)
        .to_string()
}

/// Azure DevOps adapter.
pub struct AzureDevOpsProvider {
    base_url: String,
    organization: String,
    project: String,
    repository: Option<String>,
    pat: Option<String>,
    api_version: String,
    closed_state: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl AzureDevOpsProvider {
    /// Create a new Azure DevOps provider.
    ///
    /// A missing PAT is not an error here; requests fail with
    /// `Authentication` instead.
    pub fn new(
        base_url: impl Into<String>,
        organization: impl Into<String>,
        project: impl Into<String>,
        pat: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization: organization.into(),
            project: project.into(),
            repository: None,
            pat: pat.filter(|p| !p.trim().is_empty()),
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            closed_state: DEFAULT_AZURE_CLOSED_STATE.to_string(),
            client: build_client(timeout)?,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Create a new provider with a custom base URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        organization: impl Into<String>,
        project: impl Into<String>,
        pat: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            base_url,
            organization,
            project,
            Some(pat.into()),
            DEFAULT_TIMEOUT,
        )
    }

    /// Repository that holds pull requests; defaults to the project name.
    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = repository.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// State written when an issue is closed (`Closed`, `Done`, ...).
    pub fn with_closed_state(mut self, closed_state: impl Into<String>) -> Self {
        self.closed_state = closed_state.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn repository(&self) -> &str {
        self.repository.as_deref().unwrap_or(&self.project)
    }

    /// Project-scoped API URL for an endpoint.
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}/_apis{}",
            self.base_url,
            encode_segment(&self.organization),
            encode_segment(&self.project),
            endpoint
        )
    }

    fn pull_requests_url(&self, endpoint: &str) -> String {
        self.api_url(&format!(
            "/git/repositories/{}/pullrequests{}",
            encode_segment(self.repository()),
            endpoint
        ))
    }

    fn work_item_web_url(&self, id: u64) -> String {
        format!(
            "{}/{}/{}/_workitems/edit/{}",
            self.base_url,
            encode_segment(&self.organization),
            encode_segment(&self.project),
            id
        )
    }

    fn pull_request_web_url(&self, id: u64) -> String {
        format!(
            "{}/{}/{}/_git/{}/pullrequest/{}",
            self.base_url,
            encode_segment(&self.organization),
            encode_segment(&self.project),
            encode_segment(self.repository()),
            id
        )
    }

    /// Build request with common headers and the API version.
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let pat = self.pat.as_deref().ok_or_else(|| {
            Error::Authentication(
                "no Azure DevOps personal access token configured (set AZURE_DEVOPS_PAT)"
                    .to_string(),
            )
        })?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(pat)
            .header("Accept", "application/json")
            .query(&[("api-version", self.api_version.as_str())]))
    }

    /// Send a request and map non-success statuses.
    ///
    /// A rejected PAT is answered with 203 and an HTML sign-in page.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
            warn!(provider = "azure_devops", "Sign-in page returned instead of data");
            return Err(Error::Authentication(
                "personal access token was rejected".to_string(),
            ));
        }
        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response("azure_devops", response).await)
        }
    }

    /// Make an authenticated GET request with typed deserialization.
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = url, "Azure DevOps GET request");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let response = self.send(self.request(Method::GET, url)?).await?;
                decode_json(response).await
            })
            .await
    }

    /// POST that only reads (WIQL, batch fetch); safe to retry.
    async fn post_query<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps query request");
        self.retry
            .run(self.sleeper.as_ref(), || async {
                let builder = self.request(Method::POST, url)?.json(body);
                decode_json(self.send(builder).await?).await
            })
            .await
    }

    /// Make an authenticated POST request.
    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "Azure DevOps POST request");
        let builder = self.request(Method::POST, url)?.json(body);
        decode_json(self.send(builder).await?).await
    }

    /// Send a JSON-Patch document (work item create and update).
    async fn patch_document(
        &self,
        method: Method,
        url: &str,
        operations: &[PatchOperation],
    ) -> Result<AzureWorkItem> {
        debug!(url = url, operations = operations.len(), "Azure DevOps JSON-Patch request");
        let builder = self
            .request(method, url)?
            .header(CONTENT_TYPE, JSON_PATCH)
            .json(operations);
        decode_json(self.send(builder).await?).await
    }

    fn closed_states(&self) -> Vec<&str> {
        let mut states: Vec<&str> = CLOSED_STATES.to_vec();
        if !states
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&self.closed_state))
        {
            states.push(&self.closed_state);
        }
        states
    }

    fn is_closed_state(&self, state: &str) -> bool {
        self.closed_states()
            .iter()
            .any(|s| s.eq_ignore_ascii_case(state))
    }

    fn closed_state_list(&self) -> String {
        self.closed_states()
            .iter()
            .map(|s| wiql_literal(s))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Run a WIQL query and return the matching ids in result order.
    async fn wiql(&self, query: String, top: Option<usize>) -> Result<Vec<u64>> {
        let mut url = self.api_url("/wit/wiql");
        if let Some(top) = top {
            url.push_str(&format!("?$top={}", top));
        }
        debug!(query = query.as_str(), "WIQL query");
        let result: WiqlResult = self.post_query(&url, &WiqlQuery { query }).await?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }

    /// Fetch work items in batches, preserving the order of `ids`.
    async fn fetch_work_items(&self, ids: &[u64]) -> Result<Vec<AzureWorkItem>> {
        let url = self.api_url("/wit/workitemsbatch");
        let mut by_id: HashMap<u64, AzureWorkItem> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let body = WorkItemBatchRequest {
                ids: chunk.to_vec(),
                fields: WORK_ITEM_FIELDS.to_vec(),
            };
            let batch: ListResponse<AzureWorkItem> = self.post_query(&url, &body).await?;
            by_id.extend(batch.value.into_iter().map(|w| (w.id, w)));
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn fetch_work_item(&self, id: u64) -> Result<AzureWorkItem> {
        self.get(&self.api_url(&format!("/wit/workitems/{}", id)))
            .await
            .map_err(|e| e.for_resource("issue", id))
    }

    /// All iterations of the project, depth-first.
    async fn list_iterations(&self) -> Result<Vec<AzureIteration>> {
        let root: AzureIteration = self
            .get(&self.api_url("/wit/classificationnodes/Iterations?$depth=10"))
            .await?;
        let mut iterations = Vec::new();
        flatten_iterations(root.children, &mut iterations);
        Ok(iterations)
    }

    /// Resolve an iteration by node id, name or iteration path.
    async fn fetch_iteration(&self, key: &str) -> Result<AzureIteration> {
        let by_id = match ResourceId::resolve(ProviderKind::AzureDevOps, ResourceKind::Milestone, key)
        {
            Ok(id) => Some(id),
            Err(e) if key.contains(':') => return Err(e),
            Err(_) => None,
        };
        let wanted = key.trim();
        self.list_iterations()
            .await?
            .into_iter()
            .find(|it| match by_id {
                Some(id) => it.id == id,
                None => {
                    it.name.eq_ignore_ascii_case(wanted)
                        || iteration_path(&self.project, it).eq_ignore_ascii_case(wanted)
                }
            })
            .ok_or_else(|| Error::not_found("iteration", wanted))
    }

    async fn map_iteration_with_counts(&self, iteration: &AzureIteration) -> Result<Milestone> {
        let path = iteration_path(&self.project, iteration);
        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.IterationPath] UNDER {}",
            wiql_literal(&path)
        );
        let ids = self.wiql(query, None).await?;
        let items = self.fetch_work_items(&ids).await?;
        let closed = items
            .iter()
            .filter(|w| self.is_closed_state(&w.fields.state))
            .count();
        Ok(map_iteration(iteration, items.len() as u32, closed as u32))
    }

    fn map_work_item(&self, work_item: &AzureWorkItem) -> Issue {
        let fields = &work_item.fields;
        let labels: LabelSet = TYPES
            .tags_to_labels(fields.tags.as_deref())
            .into_iter()
            .map(Label::new)
            .collect();
        Issue {
            id: ResourceId::new(ProviderKind::AzureDevOps, ResourceKind::Issue, work_item.id),
            provider_id: work_item.id.to_string(),
            title: fields.title.clone(),
            body: fields.description.clone(),
            state: if self.is_closed_state(&fields.state) {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            issue_type: TYPES.work_item_to_type(&fields.work_item_type),
            priority: TYPES.priority_from_field(fields.priority),
            labels,
            // Work items sitting on the project root have no iteration.
            milestone: fields
                .iteration_path
                .clone()
                .filter(|path| path.contains('\\')),
            url: self.work_item_web_url(work_item.id),
            created_at: fields.created_date,
            updated_at: fields.changed_date,
        }
    }

    fn map_pull_request(&self, azure_pr: &AzurePullRequest) -> PullRequest {
        let completed = azure_pr.status == "completed";
        let (state, merged_at) = PullRequestState::resolve(
            completed,
            azure_pr.status == "abandoned",
            azure_pr.closed_date.filter(|_| completed),
            azure_pr.closed_date.unwrap_or(azure_pr.creation_date),
        );

        let mut closes_issues: Vec<u64> = azure_pr
            .work_item_refs
            .iter()
            .filter_map(|r| r.id.parse().ok())
            .collect();
        for n in azure_pr
            .description
            .as_deref()
            .map(closing_references)
            .unwrap_or_default()
        {
            if !closes_issues.contains(&n) {
                closes_issues.push(n);
            }
        }

        let url = azure_pr
            .repository
            .as_ref()
            .and_then(|r| r.web_url.as_deref())
            .map(|web| format!("{}/pullrequest/{}", web, azure_pr.pull_request_id))
            .unwrap_or_else(|| self.pull_request_web_url(azure_pr.pull_request_id));

        PullRequest {
            id: ResourceId::new(
                ProviderKind::AzureDevOps,
                ResourceKind::PullRequest,
                azure_pr.pull_request_id,
            ),
            provider_id: azure_pr.pull_request_id.to_string(),
            title: azure_pr.title.clone(),
            body: azure_pr.description.clone(),
            source_branch: branch_name(&azure_pr.source_ref_name),
            target_branch: branch_name(&azure_pr.target_ref_name),
            state,
            draft: azure_pr.is_draft,
            labels: azure_pr
                .labels
                .iter()
                .filter(|l| l.active.unwrap_or(true))
                .map(|l| Label::new(l.name.clone()))
                .collect(),
            closes_issues,
            url,
            created_at: azure_pr.creation_date,
            merged_at,
        }
    }
}

// =============================================================================
// Mapping functions
// =============================================================================

fn flatten_iterations(nodes: Vec<AzureIteration>, out: &mut Vec<AzureIteration>) {
    for mut node in nodes {
        let children = std::mem::take(&mut node.children);
        out.push(node);
        flatten_iterations(children, out);
    }
}

/// `System.IterationPath` value of an iteration node.
///
/// Node paths carry the structure group (`\Web\Iteration\Sprint 1`);
/// work item fields do not (`Web\Sprint 1`).
fn iteration_path(project: &str, iteration: &AzureIteration) -> String {
    match &iteration.path {
        Some(path) => {
            let mut segments: Vec<&str> = path.split('\\').filter(|s| !s.is_empty()).collect();
            if segments
                .get(1)
                .is_some_and(|s| s.eq_ignore_ascii_case("Iteration"))
            {
                segments.remove(1);
            }
            segments.join("\\")
        }
        None => format!("{}\\{}", project, iteration.name),
    }
}

fn map_iteration(iteration: &AzureIteration, total: u32, closed: u32) -> Milestone {
    let finish = iteration
        .attributes
        .as_ref()
        .and_then(|a| a.finish_date);
    let (issue_count, closed_issue_count) = Milestone::counts(total, closed);
    Milestone {
        id: ResourceId::new(ProviderKind::AzureDevOps, ResourceKind::Milestone, iteration.id),
        provider_id: iteration.id.to_string(),
        title: iteration.name.clone(),
        description: None,
        state: if finish.is_some_and(|f| f < Utc::now()) {
            MilestoneState::Closed
        } else {
            MilestoneState::Open
        },
        due_date: finish.map(|f| f.date_naive()),
        issue_count,
        closed_issue_count,
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl IssueProvider for AzureDevOpsProvider {
    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue> {
        request.validate()?;

        let mut operations = vec![PatchOperation::add_field(
            FIELD_TITLE,
            request.title.trim(),
        )];
        if let Some(body) = &request.body {
            operations.push(PatchOperation::add_field(FIELD_DESCRIPTION, body.as_str()));
        }
        if let Some(priority) = request.priority {
            operations.push(PatchOperation::add_field(
                FIELD_PRIORITY,
                TYPES.priority_field(priority),
            ));
        }
        if !request.labels.is_empty() {
            operations.push(PatchOperation::add_field(
                FIELD_TAGS,
                TYPES.labels_to_tags(&request.labels),
            ));
        }
        if let Some(key) = &request.milestone {
            let iteration = self.fetch_iteration(key).await?;
            operations.push(PatchOperation::add_field(
                FIELD_ITERATION,
                iteration_path(&self.project, &iteration),
            ));
        }

        let work_item_type = TYPES.type_to_work_item(request.issue_type);
        let url = self.api_url(&format!("/wit/workitems/${}", encode_segment(work_item_type)));
        let work_item = self.patch_document(Method::POST, &url, &operations).await?;
        Ok(self.map_work_item(&work_item))
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        let id = ResourceId::resolve(ProviderKind::AzureDevOps, ResourceKind::Issue, id)?;
        Ok(self.map_work_item(&self.fetch_work_item(id).await?))
    }

    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        if filter.limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut conditions = vec!["[System.TeamProject] = @project".to_string()];
        match filter.state.unwrap_or_default() {
            StateFilter::Open => conditions.push(format!(
                "[System.State] NOT IN ({})",
                self.closed_state_list()
            )),
            StateFilter::Closed => {
                conditions.push(format!("[System.State] IN ({})", self.closed_state_list()))
            }
            StateFilter::All => {}
        }
        if let Some(issue_type) = filter.issue_type {
            conditions.push(format!(
                "[System.WorkItemType] = {}",
                wiql_literal(TYPES.type_to_work_item(issue_type))
            ));
        }
        if let Some(label) = &filter.label {
            conditions.push(format!("[System.Tags] CONTAINS {}", wiql_literal(label)));
        }
        if let Some(milestone) = &filter.milestone {
            let iteration = self.fetch_iteration(milestone).await?;
            conditions.push(format!(
                "[System.IterationPath] UNDER {}",
                wiql_literal(&iteration_path(&self.project, &iteration))
            ));
        }

        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE {} ORDER BY [System.ChangedDate] DESC",
            conditions.join(" AND ")
        );
        let ids = self.wiql(query, filter.limit).await?;
        let items = self.fetch_work_items(&ids).await?;
        Ok(items.iter().map(|w| self.map_work_item(w)).collect())
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        update.validate()?;
        let id = ResourceId::resolve(ProviderKind::AzureDevOps, ResourceKind::Issue, id)?;

        if let Some(wanted) = update.issue_type {
            let current = self.fetch_work_item(id).await?;
            let current_type: IssueType = TYPES.work_item_to_type(&current.fields.work_item_type);
            if current_type != wanted {
                return Err(Error::not_supported(
                    ProviderKind::AzureDevOps.as_str(),
                    "changing the type of an existing work item",
                ));
            }
        }

        let mut operations = Vec::new();
        if let Some(title) = &update.title {
            operations.push(PatchOperation::add_field(FIELD_TITLE, title.trim()));
        }
        if let Some(body) = &update.body {
            operations.push(PatchOperation::add_field(FIELD_DESCRIPTION, body.as_str()));
        }
        if let Some(state) = update.state {
            let value = match state {
                IssueState::Closed => self.closed_state.as_str(),
                IssueState::Open => REOPEN_STATE,
            };
            operations.push(PatchOperation::add_field(FIELD_STATE, value));
        }
        if let Some(priority) = update.priority {
            operations.push(PatchOperation::add_field(
                FIELD_PRIORITY,
                TYPES.priority_field(priority),
            ));
        }
        if let Some(labels) = &update.labels {
            operations.push(PatchOperation::add_field(
                FIELD_TAGS,
                TYPES.labels_to_tags(labels),
            ));
        }
        if let Some(key) = &update.milestone {
            let iteration = self.fetch_iteration(key).await?;
            operations.push(PatchOperation::add_field(
                FIELD_ITERATION,
                iteration_path(&self.project, &iteration),
            ));
        }

        if operations.is_empty() {
            return self.get_issue(&id.to_string()).await;
        }

        let url = self.api_url(&format!("/wit/workitems/{}", id));
        let work_item = self
            .patch_document(Method::PATCH, &url, &operations)
            .await
            .map_err(|e| e.for_resource("issue", id))?;
        Ok(self.map_work_item(&work_item))
    }
}

#[async_trait]
impl PullRequestProvider for AzureDevOpsProvider {
    async fn create_pull_request(&self, request: CreatePullRequestRequest) -> Result<PullRequest> {
        request.validate()?;
        let closes = request
            .closes
            .iter()
            .map(|c| ResourceId::resolve(ProviderKind::AzureDevOps, ResourceKind::Issue, c))
            .collect::<Result<Vec<u64>>>()?;

        let body = CreatePullRequestBody {
            title: request.title.trim().to_string(),
            description: request.body,
            source_ref_name: branch_ref(request.source_branch.trim()),
            target_ref_name: branch_ref(request.target_branch.trim()),
            is_draft: request.draft,
            work_item_refs: closes
                .iter()
                .map(|id| ResourceRef {
                    id: id.to_string(),
                    url: None,
                })
                .collect(),
        };
        let mut azure_pr: AzurePullRequest = self.post(&self.pull_requests_url(""), &body).await?;

        let labels_url = self.pull_requests_url(&format!("/{}/labels", azure_pr.pull_request_id));
        for name in &request.labels {
            let label_body = CreateLabelBody {
                name: name.trim().to_string(),
            };
            match self.post::<AzureLabel, _>(&labels_url, &label_body).await {
                Ok(label) => azure_pr.labels.push(label),
                Err(e) if is_label_exists_error(&e) => {
                    debug!(label = name.as_str(), "Label already on pull request")
                }
                Err(e) => return Err(e),
            }
        }

        // The create response does not echo work item refs.
        if azure_pr.work_item_refs.is_empty() {
            azure_pr.work_item_refs = body.work_item_refs;
        }
        Ok(self.map_pull_request(&azure_pr))
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest> {
        let id = ResourceId::resolve(ProviderKind::AzureDevOps, ResourceKind::PullRequest, id)?;
        let azure_pr: AzurePullRequest = self
            .get(&self.pull_requests_url(&format!("/{}", id)))
            .await
            .map_err(|e| e.for_resource("pull request", id))?;
        Ok(self.map_pull_request(&azure_pr))
    }

    async fn list_pull_requests(&self, filter: PullRequestFilter) -> Result<Vec<PullRequest>> {
        let state = filter.state.unwrap_or_default();
        let mut params = vec![(
            "searchCriteria.status",
            match state {
                PullRequestStateFilter::Open => "active",
                PullRequestStateFilter::Closed => "abandoned",
                PullRequestStateFilter::Merged => "completed",
                PullRequestStateFilter::All => "all",
            }
            .to_string(),
        )];
        if let Some(source) = &filter.source_branch {
            params.push(("searchCriteria.sourceRefName", branch_ref(source)));
        }
        if let Some(target) = &filter.target_branch {
            params.push(("searchCriteria.targetRefName", branch_ref(target)));
        }

        let base = self.pull_requests_url("");
        let mut results = Vec::new();
        if filter.limit == Some(0) {
            return Ok(results);
        }
        let mut skip = 0usize;
        loop {
            let mut page_url = Url::parse(&base)
                .map_err(|e| Error::validation("url", format!("invalid URL '{}': {}", base, e)))?;
            page_url
                .query_pairs_mut()
                .extend_pairs(params.iter())
                .append_pair("$top", &PR_PAGE_SIZE.to_string())
                .append_pair("$skip", &skip.to_string());

            let page: ListResponse<AzurePullRequest> = self.get(page_url.as_str()).await?;
            let page_len = page.value.len();
            for azure_pr in &page.value {
                let pr = self.map_pull_request(azure_pr);
                let labelled = filter
                    .label
                    .as_deref()
                    .map_or(true, |l| pr.labels.contains(l));
                if labelled && state.matches(pr.state) {
                    results.push(pr);
                    if filter.limit.is_some_and(|l| results.len() >= l) {
                        return Ok(results);
                    }
                }
            }

            if page_len < PR_PAGE_SIZE {
                return Ok(results);
            }
            skip += page_len;
        }
    }
}

#[async_trait]
impl MilestoneProvider for AzureDevOpsProvider {
    async fn create_milestone(&self, request: CreateMilestoneRequest) -> Result<Milestone> {
        request.validate()?;
        if request.description.is_some() {
            debug!("Iterations have no description; dropping it");
        }
        let body = CreateIterationBody {
            name: request.title.trim().to_string(),
            attributes: request.due_date.map(|due| IterationAttributes {
                start_date: None,
                finish_date: due.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            }),
        };
        let iteration: AzureIteration = self
            .post(&self.api_url("/wit/classificationnodes/Iterations"), &body)
            .await?;
        Ok(map_iteration(&iteration, 0, 0))
    }

    async fn get_milestone(&self, id: &str) -> Result<Milestone> {
        let iteration = self.fetch_iteration(id).await?;
        self.map_iteration_with_counts(&iteration).await
    }

    async fn list_milestones(&self, state: StateFilter) -> Result<Vec<Milestone>> {
        let mut milestones = Vec::new();
        for iteration in self.list_iterations().await? {
            let milestone = self.map_iteration_with_counts(&iteration).await?;
            let keep = match state {
                StateFilter::Open => milestone.state == MilestoneState::Open,
                StateFilter::Closed => milestone.state == MilestoneState::Closed,
                StateFilter::All => true,
            };
            if keep {
                milestones.push(milestone);
            }
        }
        Ok(milestones)
    }
}

#[async_trait]
impl GitProvider for AzureDevOpsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureDevOps
    }

    async fn is_available(&self) -> bool {
        self.pat.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitprov_core::Priority;

    fn iteration(id: u64, name: &str, path: Option<&str>, finish: Option<&str>) -> AzureIteration {
        AzureIteration {
            id,
            identifier: None,
            name: name.to_string(),
            path: path.map(str::to_string),
            attributes: Some(IterationAttributes {
                start_date: None,
                finish_date: finish.map(|f| f.parse().unwrap()),
            }),
            children: vec![],
        }
    }

    fn provider() -> AzureDevOpsProvider {
        AzureDevOpsProvider::with_base_url("https://dev.azure.com", "contoso", "Web App", "pat")
            .unwrap()
    }

    #[test]
    fn test_collection_url() {
        assert_eq!(collection_url(None), "https://dev.azure.com");
        assert_eq!(
            collection_url(Some("tfs.corp.local/tfs/")),
            "https://tfs.corp.local/tfs"
        );
        assert_eq!(
            collection_url(Some("http://tfs:8080/tfs")),
            "http://tfs:8080/tfs"
        );
    }

    #[test]
    fn test_urls_encode_spaces() {
        let provider = provider();
        assert_eq!(
            provider.api_url("/wit/wiql"),
            "https://dev.azure.com/contoso/Web%20App/_apis/wit/wiql"
        );
        assert_eq!(
            provider.pull_requests_url("/3"),
            "https://dev.azure.com/contoso/Web%20App/_apis/git/repositories/Web%20App/pullrequests/3"
        );
        let provider = provider.with_repository(Some("frontend".to_string()));
        assert!(provider.pull_requests_url("").ends_with("/repositories/frontend/pullrequests"));
    }

    #[test]
    fn test_urls_encode_reserved_and_non_ascii() {
        assert_eq!(encode_segment("R&D #ops"), "R&D%20%23ops");
        assert_eq!(encode_segment("100% done"), "100%25%20done");
        assert_eq!(encode_segment("Café"), "Caf%C3%A9");
        assert_eq!(encode_segment("a/b?c"), "a%2Fb%3Fc");

        let provider =
            AzureDevOpsProvider::with_base_url("https://dev.azure.com", "contoso", "Café #1", "pat")
                .unwrap();
        assert_eq!(
            provider.work_item_web_url(7),
            "https://dev.azure.com/contoso/Caf%C3%A9%20%231/_workitems/edit/7"
        );
    }

    #[test]
    fn test_wiql_literal_escapes_quotes() {
        assert_eq!(wiql_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_branch_refs() {
        assert_eq!(branch_ref("feature/x"), "refs/heads/feature/x");
        assert_eq!(branch_ref("refs/heads/main"), "refs/heads/main");
        assert_eq!(branch_name("refs/heads/feature/x"), "feature/x");
    }

    #[test]
    fn test_closed_states_include_configured_state() {
        let provider = provider().with_closed_state("Shipped");
        assert!(provider.is_closed_state("done"));
        assert!(provider.is_closed_state("Shipped"));
        assert!(!provider.is_closed_state("Active"));
        assert_eq!(
            provider.closed_state_list(),
            "'Closed', 'Done', 'Resolved', 'Removed', 'Shipped'"
        );
        assert_eq!(self::provider().closed_states().len(), 4);
    }

    #[test]
    fn test_iteration_path() {
        let it = iteration(5, "Sprint 1", Some("\\Web App\\Iteration\\Sprint 1"), None);
        assert_eq!(iteration_path("Web App", &it), "Web App\\Sprint 1");

        let nested = iteration(6, "Week 2", Some("\\Web App\\Iteration\\Q1\\Week 2"), None);
        assert_eq!(iteration_path("Web App", &nested), "Web App\\Q1\\Week 2");

        let bare = iteration(7, "Sprint 9", None, None);
        assert_eq!(iteration_path("Web App", &bare), "Web App\\Sprint 9");
    }

    #[test]
    fn test_flatten_iterations() {
        let mut parent = iteration(1, "Q1", None, None);
        parent.children = vec![iteration(2, "Week 1", None, None), iteration(3, "Week 2", None, None)];
        let mut out = Vec::new();
        flatten_iterations(vec![parent, iteration(4, "Q2", None, None)], &mut out);
        let ids: Vec<u64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_iteration_state_follows_finish_date() {
        let past = map_iteration(&iteration(1, "Old", None, Some("2020-01-31T00:00:00Z")), 4, 9);
        assert_eq!(past.state, MilestoneState::Closed);
        assert_eq!(past.closed_issue_count, 4);
        assert_eq!(past.due_date.unwrap().to_string(), "2020-01-31");

        let open = map_iteration(&iteration(2, "Later", None, Some("2999-01-01T00:00:00Z")), 0, 0);
        assert_eq!(open.state, MilestoneState::Open);

        let undated = map_iteration(&iteration(3, "Backlog", None, None), 0, 0);
        assert_eq!(undated.state, MilestoneState::Open);
    }

    #[test]
    fn test_map_work_item() {
        let work_item: AzureWorkItem = serde_json::from_value(serde_json::json!({
            "id": 12,
            "fields": {
                "System.Title": "Checkout broken",
                "System.WorkItemType": "Bug",
                "System.State": "Resolved",
                "System.Tags": "frontend; urgent",
                "System.IterationPath": "Web App\\Sprint 1",
                "Microsoft.VSTS.Common.Priority": 1,
                "System.CreatedDate": "2024-01-01T00:00:00Z",
                "System.ChangedDate": "2024-01-02T00:00:00Z"
            }
        }))
        .unwrap();

        let issue = provider().map_work_item(&work_item);
        assert_eq!(issue.id.to_string(), "azure_devops:issue:12");
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.priority, Some(Priority::P1));
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.labels.names(), vec!["frontend", "urgent"]);
        assert_eq!(issue.milestone.as_deref(), Some("Web App\\Sprint 1"));
        assert_eq!(
            issue.url,
            "https://dev.azure.com/contoso/Web%20App/_workitems/edit/12"
        );
    }

    #[test]
    fn test_map_pull_request_states() {
        let provider = provider();
        let pr = |status: &str| -> AzurePullRequest {
            serde_json::from_value(serde_json::json!({
                "pullRequestId": 8,
                "title": "Add cache",
                "description": "Fixes #3",
                "status": status,
                "sourceRefName": "refs/heads/cache",
                "targetRefName": "refs/heads/main",
                "creationDate": "2024-01-01T00:00:00Z",
                "closedDate": "2024-01-05T00:00:00Z",
                "workItemRefs": [{"id": "7"}]
            }))
            .unwrap()
        };

        let merged = provider.map_pull_request(&pr("completed"));
        assert_eq!(merged.state, PullRequestState::Merged);
        assert_eq!(merged.merged_at.unwrap().to_rfc3339(), "2024-01-05T00:00:00+00:00");
        assert_eq!(merged.closes_issues, vec![7, 3]);
        assert_eq!(merged.source_branch, "cache");

        let abandoned = provider.map_pull_request(&pr("abandoned"));
        assert_eq!(abandoned.state, PullRequestState::Closed);
        assert!(abandoned.merged_at.is_none());

        let active = provider.map_pull_request(&pr("active"));
        assert_eq!(active.state, PullRequestState::Open);
        assert!(active.url.ends_with("/_git/Web%20App/pullrequest/8"));
    }

    #[tokio::test]
    async fn test_missing_pat_fails_on_use() {
        let provider =
            AzureDevOpsProvider::new("http://127.0.0.1:9", "o", "p", None, DEFAULT_TIMEOUT)
                .unwrap();
        assert!(!provider.is_available().await);
        let err = provider.get_issue("1").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    mod integration {
        use super::*;
        use httpmock::prelude::*;
        use serde_json::json;

        fn create_test_provider(server: &MockServer) -> AzureDevOpsProvider {
            AzureDevOpsProvider::with_base_url(server.base_url(), "contoso", "web", "test-pat")
                .unwrap()
                .with_retry_policy(RetryPolicy::new(3, Duration::ZERO))
        }

        fn work_item_json(id: u64, work_item_type: &str, state: &str) -> serde_json::Value {
            json!({
                "id": id,
                "rev": 1,
                "fields": {
                    "System.Title": format!("Item {}", id),
                    "System.WorkItemType": work_item_type,
                    "System.State": state,
                    "System.CreatedDate": "2024-01-01T00:00:00Z",
                    "System.ChangedDate": "2024-01-02T00:00:00Z"
                }
            })
        }

        #[tokio::test]
        async fn test_create_issue_posts_json_patch_to_type_endpoint() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/wit/workitems/$Bug")
                    .query_param("api-version", "7.1")
                    .header("Authorization", "Bearer test-pat")
                    .header("Content-Type", "application/json-patch+json")
                    .body_includes("\"path\":\"/fields/System.Title\"")
                    .body_includes("\"value\":\"Login fails\"")
                    .body_includes("\"path\":\"/fields/Microsoft.VSTS.Common.Priority\"")
                    .body_includes("\"value\":\"auth; web\"");
                then.status(200).json_body(json!({
                    "id": 41,
                    "fields": {
                        "System.Title": "Login fails",
                        "System.WorkItemType": "Bug",
                        "System.State": "New",
                        "System.Tags": "auth; web",
                        "Microsoft.VSTS.Common.Priority": 1,
                        "System.CreatedDate": "2024-01-01T00:00:00Z",
                        "System.ChangedDate": "2024-01-01T00:00:00Z"
                    }
                }));
            });

            let provider = create_test_provider(&server);
            let mut request = CreateIssueRequest::new("Login fails", IssueType::Bug);
            request.priority = Some(Priority::P1);
            request.labels = vec!["auth".to_string(), "web".to_string()];
            let issue = provider.create_issue(request).await.unwrap();

            create.assert_calls(1);
            assert_eq!(issue.id.to_string(), "azure_devops:issue:41");
            assert_eq!(issue.issue_type, IssueType::Bug);
            assert_eq!(issue.priority, Some(Priority::P1));
            assert_eq!(issue.state, IssueState::Open);
        }

        #[tokio::test]
        async fn test_create_user_story_encodes_type() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST)
                    .path_includes("/_apis/wit/workitems/$User");
                then.status(200)
                    .json_body(work_item_json(2, "User Story", "New"));
            });

            let provider = create_test_provider(&server);
            let issue = provider
                .create_issue(CreateIssueRequest::new("As a user", IssueType::UserStory))
                .await
                .unwrap();

            create.assert_calls(1);
            assert_eq!(issue.issue_type, IssueType::UserStory);
        }

        #[tokio::test]
        async fn test_list_issues_keeps_wiql_order() {
            let server = MockServer::start();
            let wiql = server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/wit/wiql")
                    .body_includes("ORDER BY [System.ChangedDate] DESC")
                    .body_includes("[System.State] NOT IN ('Closed', 'Done', 'Resolved', 'Removed')")
                    .body_includes("[System.WorkItemType] = 'Bug'");
                then.status(200).json_body(json!({
                    "workItems": [{"id": 3}, {"id": 1}, {"id": 2}]
                }));
            });
            server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/wit/workitemsbatch")
                    .body_includes("\"ids\":[3,1,2]");
                then.status(200).json_body(json!({
                    "count": 3,
                    "value": [
                        work_item_json(1, "Bug", "Active"),
                        work_item_json(2, "Bug", "New"),
                        work_item_json(3, "Bug", "Active")
                    ]
                }));
            });

            let provider = create_test_provider(&server);
            let issues = provider
                .list_issues(IssueFilter {
                    issue_type: Some(IssueType::Bug),
                    ..Default::default()
                })
                .await
                .unwrap();

            wiql.assert_calls(1);
            let ids: Vec<&str> = issues.iter().map(|i| i.provider_id.as_str()).collect();
            assert_eq!(ids, vec!["3", "1", "2"]);
        }

        #[tokio::test]
        async fn test_list_issues_fetches_in_batches_of_200() {
            let server = MockServer::start();
            let ids: Vec<serde_json::Value> = (1..=250).map(|id| json!({"id": id})).collect();
            server.mock(|when, then| {
                when.method(POST).path("/contoso/web/_apis/wit/wiql");
                then.status(200).json_body(json!({"workItems": ids}));
            });
            let batch = server.mock(|when, then| {
                when.method(POST).path("/contoso/web/_apis/wit/workitemsbatch");
                then.status(200).json_body(json!({"count": 0, "value": []}));
            });

            let provider = create_test_provider(&server);
            let issues = provider
                .list_issues(IssueFilter {
                    state: Some(StateFilter::All),
                    ..Default::default()
                })
                .await
                .unwrap();

            batch.assert_calls(2);
            assert!(issues.is_empty());
        }

        #[tokio::test]
        async fn test_wiql_is_retried() {
            let server = MockServer::start();
            let wiql = server.mock(|when, then| {
                when.method(POST).path("/contoso/web/_apis/wit/wiql");
                then.status(503);
            });

            let provider = create_test_provider(&server);
            let err = provider
                .list_issues(IssueFilter::default())
                .await
                .unwrap_err();

            wiql.assert_calls(3);
            assert!(matches!(err, Error::TransientNetwork(_)));
        }

        #[tokio::test]
        async fn test_create_is_not_retried() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST).path("/contoso/web/_apis/wit/workitems/$Task");
                then.status(502);
            });

            let provider = create_test_provider(&server);
            let err = provider
                .create_issue(CreateIssueRequest::new("Chore", IssueType::Task))
                .await
                .unwrap_err();

            create.assert_calls(1);
            assert!(matches!(err, Error::TransientNetwork(_)));
        }

        #[tokio::test]
        async fn test_changing_type_is_not_supported() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/contoso/web/_apis/wit/workitems/5");
                then.status(200).json_body(work_item_json(5, "Task", "Active"));
            });
            let patch = server.mock(|when, then| {
                when.method(PATCH).path("/contoso/web/_apis/wit/workitems/5");
                then.status(200).json_body(work_item_json(5, "Bug", "Active"));
            });

            let provider = create_test_provider(&server);
            let err = provider
                .update_issue(
                    "5",
                    IssueUpdate {
                        issue_type: Some(IssueType::Bug),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();

            patch.assert_calls(0);
            assert!(matches!(err, Error::NotSupported { .. }));
        }

        #[tokio::test]
        async fn test_close_writes_configured_state() {
            let server = MockServer::start();
            let patch = server.mock(|when, then| {
                when.method(PATCH)
                    .path("/contoso/web/_apis/wit/workitems/5")
                    .header("Content-Type", "application/json-patch+json")
                    .body_includes("\"path\":\"/fields/System.State\"")
                    .body_includes("\"value\":\"Done\"");
                then.status(200).json_body(work_item_json(5, "Task", "Done"));
            });

            let provider = create_test_provider(&server).with_closed_state("Done");
            let issue = provider.close_issue("azure_devops:issue:5").await.unwrap();

            patch.assert_calls(1);
            assert_eq!(issue.state, IssueState::Closed);
        }

        #[tokio::test]
        async fn test_reopen_writes_active() {
            let server = MockServer::start();
            let patch = server.mock(|when, then| {
                when.method(PATCH)
                    .path("/contoso/web/_apis/wit/workitems/5")
                    .body_includes("\"value\":\"Active\"");
                then.status(200).json_body(work_item_json(5, "Task", "Active"));
            });

            let provider = create_test_provider(&server);
            let issue = provider.reopen_issue("5").await.unwrap();

            patch.assert_calls(1);
            assert_eq!(issue.state, IssueState::Open);
        }

        #[tokio::test]
        async fn test_sign_in_page_is_authentication_error() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/contoso/web/_apis/wit/workitems/1");
                then.status(203)
                    .header("Content-Type", "text/html")
                    .body("<html>Sign in</html>");
            });

            let provider = create_test_provider(&server);
            let err = provider.get_issue("1").await.unwrap_err();
            assert!(matches!(err, Error::Authentication(_)));
        }

        #[tokio::test]
        async fn test_missing_work_item_is_issue_not_found() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/contoso/web/_apis/wit/workitems/404");
                then.status(404).json_body(json!({"message": "TF401232: Work item 404 does not exist"}));
            });
            server.mock(|when, then| {
                when.method(PATCH).path("/contoso/web/_apis/wit/workitems/404");
                then.status(404).json_body(json!({"message": "TF401232: Work item 404 does not exist"}));
            });

            let provider = create_test_provider(&server);
            let expected = Error::NotFound {
                resource: "issue".to_string(),
                id: "404".to_string(),
            };
            assert_eq!(provider.get_issue("404").await.unwrap_err(), expected);
            assert_eq!(provider.close_issue("404").await.unwrap_err(), expected);
        }

        #[tokio::test]
        async fn test_get_milestone_by_name_counts_iteration_items() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/contoso/web/_apis/wit/classificationnodes/Iterations");
                then.status(200).json_body(json!({
                    "id": 1,
                    "name": "web",
                    "path": "\\web\\Iteration",
                    "children": [{
                        "id": 10,
                        "name": "Sprint 1",
                        "path": "\\web\\Iteration\\Sprint 1",
                        "attributes": {
                            "startDate": "2020-01-01T00:00:00Z",
                            "finishDate": "2020-01-14T00:00:00Z"
                        }
                    }]
                }));
            });
            server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/wit/wiql")
                    .body_includes("[System.IterationPath] UNDER 'web\\\\Sprint 1'");
                then.status(200)
                    .json_body(json!({"workItems": [{"id": 1}, {"id": 2}, {"id": 3}]}));
            });
            server.mock(|when, then| {
                when.method(POST).path("/contoso/web/_apis/wit/workitemsbatch");
                then.status(200).json_body(json!({
                    "value": [
                        work_item_json(1, "Task", "Done"),
                        work_item_json(2, "Bug", "Closed"),
                        work_item_json(3, "Task", "Active")
                    ]
                }));
            });

            let provider = create_test_provider(&server);
            let milestone = provider.get_milestone("sprint 1").await.unwrap();

            assert_eq!(milestone.id.to_string(), "azure_devops:milestone:10");
            assert_eq!(milestone.state, MilestoneState::Closed);
            assert_eq!(milestone.issue_count, 3);
            assert_eq!(milestone.closed_issue_count, 2);
        }

        #[tokio::test]
        async fn test_create_pull_request_with_refs_and_labels() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/git/repositories/web/pullrequests")
                    .body_includes("\"sourceRefName\":\"refs/heads/feature/login\"")
                    .body_includes("\"targetRefName\":\"refs/heads/main\"")
                    .body_includes("\"workItemRefs\":[{\"id\":\"12\"}]");
                then.status(201).json_body(json!({
                    "pullRequestId": 77,
                    "title": "Login",
                    "status": "active",
                    "sourceRefName": "refs/heads/feature/login",
                    "targetRefName": "refs/heads/main",
                    "creationDate": "2024-01-01T00:00:00Z",
                    "repository": {"name": "web", "webUrl": "https://dev.azure.com/contoso/web/_git/web"}
                }));
            });
            let label = server.mock(|when, then| {
                when.method(POST)
                    .path("/contoso/web/_apis/git/repositories/web/pullrequests/77/labels")
                    .body_includes("\"name\":\"needs-review\"");
                then.status(200).json_body(json!({"name": "needs-review", "active": true}));
            });

            let provider = create_test_provider(&server);
            let pr = provider
                .create_pull_request(CreatePullRequestRequest {
                    title: "Login".to_string(),
                    body: None,
                    source_branch: "feature/login".to_string(),
                    target_branch: "main".to_string(),
                    draft: false,
                    labels: vec!["needs-review".to_string()],
                    closes: vec!["12".to_string()],
                })
                .await
                .unwrap();

            create.assert_calls(1);
            label.assert_calls(1);
            assert_eq!(pr.closes_issues, vec![12]);
            assert!(pr.labels.contains("needs-review"));
            assert_eq!(
                pr.url,
                "https://dev.azure.com/contoso/web/_git/web/pullrequest/77"
            );
        }

        #[tokio::test]
        async fn test_list_merged_pull_requests() {
            let server = MockServer::start();
            let list = server.mock(|when, then| {
                when.method(GET)
                    .path("/contoso/web/_apis/git/repositories/web/pullrequests")
                    .query_param("searchCriteria.status", "completed")
                    .query_param("$skip", "0");
                then.status(200).json_body(json!({
                    "count": 1,
                    "value": [{
                        "pullRequestId": 3,
                        "title": "Done",
                        "status": "completed",
                        "sourceRefName": "refs/heads/x",
                        "targetRefName": "refs/heads/main",
                        "creationDate": "2024-01-01T00:00:00Z",
                        "closedDate": "2024-01-02T00:00:00Z"
                    }]
                }));
            });

            let provider = create_test_provider(&server);
            let prs = provider
                .list_pull_requests(PullRequestFilter {
                    state: Some(PullRequestStateFilter::Merged),
                    ..Default::default()
                })
                .await
                .unwrap();

            list.assert_calls(1);
            assert_eq!(prs.len(), 1);
            assert_eq!(prs[0].state, PullRequestState::Merged);
            assert!(prs[0].merged_at.is_some());
        }
    }
}
