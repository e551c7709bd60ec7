//! Translation between the unified issue type / priority vocabulary and the
//! label or work-item conventions of each provider.
//!
//! Label-based providers (GitHub, GitLab) get a [`LabelScheme`]; Azure DevOps
//! classifies through work-item types and gets [`WorkItemTypeMap`].

use crate::error::Error;
use crate::types::{IssueType, Priority};

/// Colour for labels created without an explicit one.
pub const DEFAULT_LABEL_COLOR: &str = "ededed";

/// The spellings a priority label can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityFormat {
    /// `P1`
    Plain,
    /// `priority:P1`
    Prefixed,
    /// `priority::1` (GitLab scoped label)
    Scoped,
    /// `critical`, `high`, `medium`, `low`
    Severity,
}

impl PriorityFormat {
    pub const ALL: [PriorityFormat; 4] = [
        PriorityFormat::Plain,
        PriorityFormat::Prefixed,
        PriorityFormat::Scoped,
        PriorityFormat::Severity,
    ];

    /// Higher is more structured.
    fn specificity(&self) -> u8 {
        match self {
            PriorityFormat::Scoped => 3,
            PriorityFormat::Prefixed => 2,
            PriorityFormat::Plain => 1,
            PriorityFormat::Severity => 0,
        }
    }

    pub fn render(&self, priority: Priority) -> String {
        match self {
            PriorityFormat::Plain => format!("P{}", priority.level()),
            PriorityFormat::Prefixed => format!("priority:P{}", priority.level()),
            PriorityFormat::Scoped => format!("priority::{}", priority.level()),
            PriorityFormat::Severity => match priority {
                Priority::P1 => "critical",
                Priority::P2 => "high",
                Priority::P3 => "medium",
                Priority::P4 => "low",
            }
            .to_string(),
        }
    }
}

/// Recognise a priority label in any supported format.
pub fn parse_priority_label(label: &str) -> Option<(Priority, PriorityFormat)> {
    let lower = label.trim().to_ascii_lowercase();

    if let Some(rest) = lower.strip_prefix("priority::") {
        let level = rest.trim_start_matches('p').parse::<u8>().ok()?;
        return Priority::from_level(level).map(|p| (p, PriorityFormat::Scoped));
    }
    if let Some(rest) = lower.strip_prefix("priority:") {
        let level = rest.trim().strip_prefix('p')?.parse::<u8>().ok()?;
        return Priority::from_level(level).map(|p| (p, PriorityFormat::Prefixed));
    }
    if let Some(rest) = lower.strip_prefix('p') {
        if let Ok(level) = rest.parse::<u8>() {
            return Priority::from_level(level).map(|p| (p, PriorityFormat::Plain));
        }
    }

    let severity = match lower.as_str() {
        "critical" => Priority::P1,
        "high" => Priority::P2,
        "medium" => Priority::P3,
        "low" => Priority::P4,
        _ => return None,
    };
    Some((severity, PriorityFormat::Severity))
}

/// Label conventions of a label-based provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelScheme {
    bug: &'static str,
    task: &'static str,
    user_story: &'static str,
    feature: &'static str,
    epic: &'static str,
    /// Format written on create/update and preferred when reading back.
    pub priority_format: PriorityFormat,
}

impl LabelScheme {
    pub const GITHUB: LabelScheme = LabelScheme {
        bug: "bug",
        task: "task",
        user_story: "user-story",
        feature: "enhancement",
        epic: "epic",
        priority_format: PriorityFormat::Prefixed,
    };

    /// Epics are emulated with an `Epic` label so free-tier projects work.
    pub const GITLAB: LabelScheme = LabelScheme {
        bug: "bug",
        task: "task",
        user_story: "user-story",
        feature: "feature",
        epic: "Epic",
        priority_format: PriorityFormat::Scoped,
    };

    pub fn type_to_label(&self, issue_type: IssueType) -> &'static str {
        match issue_type {
            IssueType::Bug => self.bug,
            IssueType::Task => self.task,
            IssueType::UserStory => self.user_story,
            IssueType::Feature => self.feature,
            IssueType::Epic => self.epic,
        }
    }

    /// Classify a label; also accepts common aliases and `type::x` scoped labels.
    pub fn recognize_type(&self, label: &str) -> Option<IssueType> {
        if let Some(t) = IssueType::ALL
            .into_iter()
            .find(|t| self.type_to_label(*t).eq_ignore_ascii_case(label))
        {
            return Some(t);
        }

        let lower = label.trim().to_ascii_lowercase();
        let name = lower
            .strip_prefix("type::")
            .or_else(|| lower.strip_prefix("type:"))
            .unwrap_or(&lower);
        match name {
            "bug" | "defect" => Some(IssueType::Bug),
            "task" | "chore" => Some(IssueType::Task),
            "user-story" | "user story" | "user_story" | "story" => Some(IssueType::UserStory),
            "feature" | "enhancement" => Some(IssueType::Feature),
            "epic" => Some(IssueType::Epic),
            _ => None,
        }
    }

    /// First recognised type label wins; unlabelled issues are tasks.
    pub fn label_to_type<'a, I>(&self, labels: I) -> IssueType
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels
            .into_iter()
            .find_map(|l| self.recognize_type(l))
            .unwrap_or(IssueType::Task)
    }

    pub fn priority_to_label(&self, priority: Priority) -> String {
        self.priority_format.render(priority)
    }

    /// Read the priority from a label set.
    ///
    /// A label in this scheme's own format wins. Otherwise the most structured
    /// recognised format wins, and within one format the first label does.
    pub fn label_to_priority<'a, I>(&self, labels: I) -> Option<Priority>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(Priority, u8)> = None;
        for label in labels {
            let Some((priority, format)) = parse_priority_label(label) else {
                continue;
            };
            let rank = if format == self.priority_format {
                u8::MAX
            } else {
                format.specificity()
            };
            if best.map_or(true, |(_, r)| rank > r) {
                best = Some((priority, rank));
            }
        }
        best.map(|(p, _)| p)
    }

    /// Full label list for a new issue: type label, priority label, then the
    /// caller's labels, de-duplicated case-insensitively.
    pub fn labels_for(
        &self,
        issue_type: IssueType,
        priority: Option<Priority>,
        extra: &[String],
    ) -> Vec<String> {
        let mut labels = Vec::new();
        push_unique(&mut labels, self.type_to_label(issue_type).to_string());
        if let Some(p) = priority {
            push_unique(&mut labels, self.priority_to_label(p));
        }
        for label in extra {
            push_unique(&mut labels, label.trim().to_string());
        }
        labels
    }

    /// Recompute a label list for a partial update.
    ///
    /// `replacement` swaps the free-form labels; `issue_type` / `priority`
    /// swap only the recognised type / priority labels. Untouched parts of
    /// `current` are preserved.
    pub fn relabel(
        &self,
        current: &[String],
        issue_type: Option<IssueType>,
        priority: Option<Priority>,
        replacement: Option<&[String]>,
    ) -> Vec<String> {
        let is_type = |l: &str| self.recognize_type(l).is_some();
        let is_priority = |l: &str| parse_priority_label(l).is_some();

        let mut labels = Vec::new();

        match issue_type {
            Some(t) => push_unique(&mut labels, self.type_to_label(t).to_string()),
            None => current
                .iter()
                .filter(|l| is_type(l.as_str()))
                .for_each(|l| push_unique(&mut labels, l.clone())),
        }

        match priority {
            Some(p) => push_unique(&mut labels, self.priority_to_label(p)),
            None => current
                .iter()
                .filter(|l| is_priority(l.as_str()))
                .for_each(|l| push_unique(&mut labels, l.clone())),
        }

        let free: Vec<String> = match replacement {
            Some(r) => r.iter().map(|l| l.trim().to_string()).collect(),
            None => current
                .iter()
                .filter(|l| !is_type(l.as_str()) && !is_priority(l.as_str()))
                .cloned()
                .collect(),
        };
        for label in free {
            // Free-form replacements may themselves carry a type or priority
            // label; an explicit type/priority field takes precedence.
            if (issue_type.is_some() && is_type(label.as_str()))
                || (priority.is_some() && is_priority(label.as_str()))
            {
                continue;
            }
            push_unique(&mut labels, label);
        }
        labels
    }

    /// Colour for an auto-created label.
    pub fn color_for(&self, label: &str) -> &'static str {
        if let Some((priority, _)) = parse_priority_label(label) {
            return match priority {
                Priority::P1 => "b60205",
                Priority::P2 => "d93f0b",
                Priority::P3 => "fbca04",
                Priority::P4 => "0e8a16",
            };
        }
        match self.recognize_type(label) {
            Some(IssueType::Bug) => "d73a4a",
            Some(IssueType::Feature) => "a2eeef",
            Some(IssueType::Epic) => "3e4b9e",
            Some(IssueType::UserStory) => "1d76db",
            Some(IssueType::Task) => "c5def5",
            None => DEFAULT_LABEL_COLOR,
        }
    }
}

fn push_unique(labels: &mut Vec<String>, label: String) {
    if !labels.iter().any(|l| l.eq_ignore_ascii_case(&label)) {
        labels.push(label);
    }
}

/// Labels from `wanted` that are absent from `existing` (case-insensitive).
pub fn missing_labels<'a>(wanted: &'a [String], existing: &[String]) -> Vec<&'a str> {
    let mut missing: Vec<&str> = Vec::new();
    for label in wanted {
        let known = existing.iter().any(|e| e.eq_ignore_ascii_case(label));
        let queued = missing.iter().any(|m| m.eq_ignore_ascii_case(label));
        if !known && !queued {
            missing.push(label);
        }
    }
    missing
}

/// Whether a failed label creation means the label is already there.
pub fn is_label_exists_error(error: &Error) -> bool {
    match error {
        Error::Validation { message, .. } => {
            let lower = message.to_ascii_lowercase();
            lower.contains("already_exists")
                || lower.contains("already exists")
                || lower.contains("has already been taken")
        }
        _ => false,
    }
}

/// Azure DevOps work-item types.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkItemTypeMap;

impl WorkItemTypeMap {
    pub fn type_to_work_item(&self, issue_type: IssueType) -> &'static str {
        match issue_type {
            IssueType::Bug => "Bug",
            IssueType::Task => "Task",
            IssueType::UserStory => "User Story",
            IssueType::Feature => "Feature",
            IssueType::Epic => "Epic",
        }
    }

    /// Unknown work-item types (`Issue`, `Impediment`, ...) read as tasks.
    pub fn work_item_to_type(&self, work_item_type: &str) -> IssueType {
        match work_item_type.trim().to_ascii_lowercase().as_str() {
            "bug" => IssueType::Bug,
            "user story" | "product backlog item" | "requirement" => IssueType::UserStory,
            "feature" => IssueType::Feature,
            "epic" => IssueType::Epic,
            _ => IssueType::Task,
        }
    }

    /// `Microsoft.VSTS.Common.Priority` is numeric 1-4.
    pub fn priority_field(&self, priority: Priority) -> u8 {
        priority.level()
    }

    pub fn priority_from_field(&self, value: Option<i64>) -> Option<Priority> {
        value
            .and_then(|v| u8::try_from(v).ok())
            .and_then(Priority::from_level)
    }

    /// `System.Tags` is a `; `-separated string.
    pub fn tags_to_labels(&self, tags: Option<&str>) -> Vec<String> {
        tags.unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn labels_to_tags(&self, labels: &[String]) -> String {
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            push_unique(&mut unique, label.trim().to_string());
        }
        unique.join("; ")
    }
}
