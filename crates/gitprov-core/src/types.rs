//! Provider-neutral domain types.
//!
//! Adapters construct these from raw API payloads; callers only read them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Providers and identifiers
// =============================================================================

/// The hosting services this layer can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "azure_devops")]
    AzureDevOps,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::AzureDevOps => "azure_devops",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            "azure_devops" | "azure-devops" | "azuredevops" | "azure" => {
                Ok(ProviderKind::AzureDevOps)
            }
            other => Err(Error::validation(
                "provider",
                format!("unknown provider '{}'", other),
            )),
        }
    }
}

/// What a [`ResourceId`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Issue,
    #[serde(rename = "pr")]
    PullRequest,
    Milestone,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Issue => "issue",
            ResourceKind::PullRequest => "pr",
            ResourceKind::Milestone => "milestone",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "issue" => Some(ResourceKind::Issue),
            "pr" => Some(ResourceKind::PullRequest),
            "milestone" => Some(ResourceKind::Milestone),
            _ => None,
        }
    }
}

/// Provider-qualified identifier, rendered as `provider:kind:number`
/// (e.g. `github:issue:123`).
///
/// Derived only from the provider and the provider's own number, so the same
/// remote resource always gets the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub provider: ProviderKind,
    pub kind: ResourceKind,
    pub number: u64,
}

impl ResourceId {
    pub fn new(provider: ProviderKind, kind: ResourceKind, number: u64) -> Self {
        Self {
            provider,
            kind,
            number,
        }
    }

    /// Resolve a caller-supplied key to the provider number.
    ///
    /// Accepts `github:issue:12`, `12` and `#12`. A qualified id that names a
    /// different provider or resource kind is rejected.
    pub fn resolve(provider: ProviderKind, kind: ResourceKind, key: &str) -> Result<u64> {
        let key = key.trim();
        if key.contains(':') {
            let id: ResourceId = key.parse()?;
            if id.provider != provider || id.kind != kind {
                return Err(Error::validation(
                    "id",
                    format!(
                        "'{}' is not a {} {} id",
                        key,
                        provider,
                        kind.as_str()
                    ),
                ));
            }
            return Ok(id.number);
        }

        key.trim_start_matches('#')
            .parse::<u64>()
            .map_err(|_| Error::validation("id", format!("invalid {} id '{}'", kind.as_str(), key)))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.kind.as_str(), self.number)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("id", format!("malformed resource id '{}'", s));
        let mut parts = s.splitn(3, ':');
        let provider = parts.next().ok_or_else(invalid)?.parse::<ProviderKind>()?;
        let kind = parts
            .next()
            .and_then(ResourceKind::parse)
            .ok_or_else(invalid)?;
        let number = parts
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        Ok(ResourceId::new(provider, kind, number))
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Unified work-item classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Bug,
    #[default]
    Task,
    UserStory,
    Feature,
    Epic,
}

impl IssueType {
    pub const ALL: [IssueType; 5] = [
        IssueType::Bug,
        IssueType::Task,
        IssueType::UserStory,
        IssueType::Feature,
        IssueType::Epic,
    ];
}

impl FromStr for IssueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "bug" => Ok(IssueType::Bug),
            "task" => Ok(IssueType::Task),
            "user_story" | "story" => Ok(IssueType::UserStory),
            "feature" => Ok(IssueType::Feature),
            "epic" => Ok(IssueType::Epic),
            other => Err(Error::validation(
                "type",
                format!("unknown issue type '{}'", other),
            )),
        }
    }
}

/// Unified priority, P1 being the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::P1, Priority::P2, Priority::P3, Priority::P4];

    pub fn level(&self) -> u8 {
        match self {
            Priority::P1 => 1,
            Priority::P2 => 2,
            Priority::P3 => 3,
            Priority::P4 => 4,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Priority::P1),
            2 => Some(Priority::P2),
            3 => Some(Priority::P3),
            4 => Some(Priority::P4),
            _ => None,
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed.trim_start_matches(['P', 'p']);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Priority::from_level)
            .ok_or_else(|| Error::validation("priority", format!("unknown priority '{}'", s)))
    }
}

// =============================================================================
// States
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueState {
    Open,
    Closed,
}

/// Pull request lifecycle. `Merged` is terminal and reachable only from `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneState {
    Open,
    Closed,
}

/// State filter for issues and milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    #[default]
    Open,
    Closed,
    All,
}

impl FromStr for StateFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "opened" | "active" => Ok(StateFilter::Open),
            "closed" => Ok(StateFilter::Closed),
            "all" => Ok(StateFilter::All),
            other => Err(Error::validation("state", format!("unknown state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestStateFilter {
    #[default]
    Open,
    Closed,
    Merged,
    All,
}

impl PullRequestStateFilter {
    pub fn matches(&self, state: PullRequestState) -> bool {
        match self {
            PullRequestStateFilter::Open => state == PullRequestState::Open,
            PullRequestStateFilter::Closed => state == PullRequestState::Closed,
            PullRequestStateFilter::Merged => state == PullRequestState::Merged,
            PullRequestStateFilter::All => true,
        }
    }
}

impl FromStr for PullRequestStateFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "opened" | "active" => Ok(PullRequestStateFilter::Open),
            "closed" | "abandoned" => Ok(PullRequestStateFilter::Closed),
            "merged" | "completed" => Ok(PullRequestStateFilter::Merged),
            "all" => Ok(PullRequestStateFilter::All),
            other => Err(Error::validation("state", format!("unknown state '{}'", other))),
        }
    }
}

// =============================================================================
// Labels
// =============================================================================

/// A provider-visible tag. Equality and hashing ignore case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            description: None,
        }
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
    }
}

/// Ordered set of labels, unique by case-insensitive name. The first
/// occurrence of a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label; returns `false` if a label with the same name exists.
    pub fn insert(&mut self, label: Label) -> bool {
        if self.contains(&label.name) {
            return false;
        }
        self.0.push(label);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label);
        }
        set
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: ResourceId,
    pub provider_id: String,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub priority: Option<Priority>,
    pub labels: LabelSet,
    /// Provider id of the milestone this issue belongs to.
    pub milestone: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A proposed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: ResourceId,
    pub provider_id: String,
    pub title: String,
    pub body: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub state: PullRequestState,
    pub draft: bool,
    pub labels: LabelSet,
    /// Issue numbers this pull request closes.
    pub closes_issues: Vec<u64>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Set if and only if `state == Merged`.
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequestState {
    /// Derive the state and merge timestamp together so the two never
    /// disagree. `fallback` stands in when a provider reports a merge without
    /// a timestamp.
    pub fn resolve(
        merged: bool,
        closed: bool,
        merged_at: Option<DateTime<Utc>>,
        fallback: DateTime<Utc>,
    ) -> (PullRequestState, Option<DateTime<Utc>>) {
        if merged || merged_at.is_some() {
            (PullRequestState::Merged, Some(merged_at.unwrap_or(fallback)))
        } else if closed {
            (PullRequestState::Closed, None)
        } else {
            (PullRequestState::Open, None)
        }
    }
}

/// A grouping of issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: ResourceId,
    pub provider_id: String,
    pub title: String,
    pub description: Option<String>,
    pub state: MilestoneState,
    pub due_date: Option<NaiveDate>,
    pub issue_count: u32,
    /// Never greater than `issue_count`.
    pub closed_issue_count: u32,
}

impl Milestone {
    /// Clamp counts so `closed_issue_count <= issue_count` holds.
    pub fn counts(issue_count: u32, closed_issue_count: u32) -> (u32, u32) {
        (issue_count, closed_issue_count.min(issue_count))
    }
}

// =============================================================================
// Requests and filters
// =============================================================================

/// Input for creating an issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIssueRequest {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, rename = "type")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Milestone id, number or title.
    #[serde(default)]
    pub milestone: Option<String>,
}

impl CreateIssueRequest {
    pub fn new(title: impl Into<String>, issue_type: IssueType) -> Self {
        Self {
            title: title.into(),
            issue_type,
            ..Default::default()
        }
    }

    /// Local checks run before any network call.
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_labels(&self.labels)
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<IssueState>,
    #[serde(default, rename = "type")]
    pub issue_type: Option<IssueType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Replaces the free-form labels (type and priority labels are managed
    /// through their own fields).
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub milestone: Option<String>,
}

impl IssueUpdate {
    pub fn state(state: IssueState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        Ok(())
    }

    /// Whether the update touches the label set at all.
    pub fn touches_labels(&self) -> bool {
        self.labels.is_some() || self.issue_type.is_some() || self.priority.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    #[serde(default)]
    pub state: Option<StateFilter>,
    #[serde(default, rename = "type")]
    pub issue_type: Option<IssueType>,
    #[serde(default)]
    pub label: Option<String>,
    /// Milestone id, number or title.
    #[serde(default)]
    pub milestone: Option<String>,
    /// Stop after this many results.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePullRequestRequest {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Issue numbers (or ids) to close when this merges.
    #[serde(default)]
    pub closes: Vec<String>,
}

impl CreatePullRequestRequest {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_labels(&self.labels)?;
        if self.source_branch.trim().is_empty() {
            return Err(Error::validation("source_branch", "source branch is required"));
        }
        if self.target_branch.trim().is_empty() {
            return Err(Error::validation("target_branch", "target branch is required"));
        }
        if self.source_branch == self.target_branch {
            return Err(Error::validation(
                "source_branch",
                "source and target branch must differ",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestFilter {
    #[serde(default)]
    pub state: Option<PullRequestStateFilter>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMilestoneRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl CreateMilestoneRequest {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::validation("title", "title must not be empty"));
    }
    Ok(())
}

fn validate_labels(labels: &[String]) -> Result<()> {
    if labels.iter().any(|l| l.trim().is_empty()) {
        return Err(Error::validation("labels", "label names must not be empty"));
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Issue numbers referenced with a closing keyword (`Closes #12`,
/// `fixes #3`, `Resolved #40`) in a pull request body.
pub fn closing_references(body: &str) -> Vec<u64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#(\d+)")
            .expect("closing keyword pattern is valid")
    });

    let mut numbers = Vec::new();
    for caps in pattern.captures_iter(body) {
        if let Ok(n) = caps[1].parse::<u64>() {
            if !numbers.contains(&n) {
                numbers.push(n);
            }
        }
    }
    numbers
}

/// Append `Closes #n` for every issue `body` does not reference yet.
pub fn with_closing_references(body: Option<String>, issues: &[u64]) -> Option<String> {
    let referenced = body.as_deref().map(closing_references).unwrap_or_default();
    let refs: Vec<String> = issues
        .iter()
        .filter(|n| !referenced.contains(n))
        .map(|n| format!("Closes #{}", n))
        .collect();
    if refs.is_empty() {
        return body;
    }

    let refs = refs.join("\n");
    Some(match body {
        Some(b) if !b.trim().is_empty() => format!("{}\n\n{}", b.trim_end(), refs),
        _ => refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display_and_parse() {
        let id = ResourceId::new(ProviderKind::GitHub, ResourceKind::Issue, 123);
        assert_eq!(id.to_string(), "github:issue:123");
        assert_eq!("github:issue:123".parse::<ResourceId>().unwrap(), id);

        let pr: ResourceId = "azure_devops:pr:9".parse().unwrap();
        assert_eq!(pr.provider, ProviderKind::AzureDevOps);
        assert_eq!(pr.kind, ResourceKind::PullRequest);
        assert_eq!(pr.number, 9);

        assert!("github:issue".parse::<ResourceId>().is_err());
        assert!("github:thing:1".parse::<ResourceId>().is_err());
        assert!("nope:issue:1".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_resource_id_resolve() {
        let gh = ProviderKind::GitHub;
        assert_eq!(ResourceId::resolve(gh, ResourceKind::Issue, "42").unwrap(), 42);
        assert_eq!(ResourceId::resolve(gh, ResourceKind::Issue, "#42").unwrap(), 42);
        assert_eq!(
            ResourceId::resolve(gh, ResourceKind::Issue, "github:issue:42").unwrap(),
            42
        );
        assert!(matches!(
            ResourceId::resolve(gh, ResourceKind::Issue, "gitlab:issue:42"),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            ResourceId::resolve(gh, ResourceKind::Issue, "github:pr:42"),
            Err(Error::Validation { .. })
        ));
        assert!(ResourceId::resolve(gh, ResourceKind::Issue, "abc").is_err());
    }

    #[test]
    fn test_resource_id_serde_as_string() {
        let id = ResourceId::new(ProviderKind::GitLab, ResourceKind::Milestone, 7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"gitlab:milestone:7\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("GitHub".parse::<ProviderKind>().unwrap(), ProviderKind::GitHub);
        assert_eq!(
            "azure-devops".parse::<ProviderKind>().unwrap(),
            ProviderKind::AzureDevOps
        );
        assert!("bitbucket".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_label_equality_ignores_case() {
        assert_eq!(Label::new("Bug"), Label::new("bug"));
        let set: LabelSet = vec![Label::new("bug"), Label::new("BUG"), Label::new("epic")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.names(), vec!["bug", "epic"]);
        assert!(set.contains("Epic"));
    }

    #[test]
    fn test_create_issue_validation() {
        let ok = CreateIssueRequest::new("Bug: login fails", IssueType::Bug);
        assert!(ok.validate().is_ok());

        let empty = CreateIssueRequest::new("   ", IssueType::Bug);
        assert!(matches!(
            empty.validate(),
            Err(Error::Validation { ref field, .. }) if field == "title"
        ));

        let mut bad_label = CreateIssueRequest::new("x", IssueType::Task);
        bad_label.labels = vec!["".to_string()];
        assert!(matches!(
            bad_label.validate(),
            Err(Error::Validation { ref field, .. }) if field == "labels"
        ));
    }

    #[test]
    fn test_pull_request_validation() {
        let request = CreatePullRequestRequest {
            title: "Add login".into(),
            source_branch: "feature/login".into(),
            target_branch: "main".into(),
            ..Default::default()
        };
        assert!(request.validate().is_ok());

        let same = CreatePullRequestRequest {
            target_branch: "feature/login".into(),
            ..request.clone()
        };
        assert!(same.validate().is_err());

        let no_source = CreatePullRequestRequest {
            source_branch: "".into(),
            ..request
        };
        assert!(no_source.validate().is_err());
    }

    #[test]
    fn test_pull_request_state_resolution() {
        let now = Utc::now();
        let (state, merged_at) = PullRequestState::resolve(false, true, Some(now), now);
        assert_eq!(state, PullRequestState::Merged);
        assert_eq!(merged_at, Some(now));

        let (state, merged_at) = PullRequestState::resolve(true, true, None, now);
        assert_eq!(state, PullRequestState::Merged);
        assert!(merged_at.is_some());

        let (state, merged_at) = PullRequestState::resolve(false, true, None, now);
        assert_eq!(state, PullRequestState::Closed);
        assert!(merged_at.is_none());

        let (state, _) = PullRequestState::resolve(false, false, None, now);
        assert_eq!(state, PullRequestState::Open);
    }

    #[test]
    fn test_milestone_counts_clamped() {
        assert_eq!(Milestone::counts(3, 5), (3, 3));
        assert_eq!(Milestone::counts(10, 4), (10, 4));
    }

    #[test]
    fn test_closing_references() {
        let body = "Closes #12\nalso fixes #3, resolved: #40 and closes #12 again. See #99";
        assert_eq!(closing_references(body), vec![12, 3, 40]);
        assert!(closing_references("no refs here").is_empty());
    }

    #[test]
    fn test_with_closing_references() {
        assert_eq!(
            with_closing_references(Some("Body".to_string()), &[3, 4]).unwrap(),
            "Body\n\nCloses #3\nCloses #4"
        );
        assert_eq!(
            with_closing_references(Some("Fixes #3".to_string()), &[3]).unwrap(),
            "Fixes #3"
        );
        assert_eq!(with_closing_references(None, &[5]).unwrap(), "Closes #5");
        assert_eq!(with_closing_references(None, &[]), None);
    }

    #[test]
    fn test_priority_and_type_parsing() {
        assert_eq!("P2".parse::<Priority>().unwrap(), Priority::P2);
        assert_eq!("3".parse::<Priority>().unwrap(), Priority::P3);
        assert!("P9".parse::<Priority>().is_err());
        assert_eq!("user-story".parse::<IssueType>().unwrap(), IssueType::UserStory);
        assert_eq!("Epic".parse::<IssueType>().unwrap(), IssueType::Epic);
        assert!("chore".parse::<IssueType>().is_err());
    }

    #[test]
    fn test_pr_state_filter_matches() {
        assert!(PullRequestStateFilter::All.matches(PullRequestState::Merged));
        assert!(PullRequestStateFilter::Merged.matches(PullRequestState::Merged));
        assert!(!PullRequestStateFilter::Closed.matches(PullRequestState::Merged));
    }
}
