use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(ProjectStatus::Planning),
            "active" => Ok(ProjectStatus::Active),
            "on_hold" => Ok(ProjectStatus::OnHold),
            "completed" => Ok(ProjectStatus::Completed),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(format!("unknown project status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Epic,
    Feature,
    Story,
    #[default]
    Task,
    Bug,
    Spike,
    Research,
}

impl WorkItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemType::Epic => "epic",
            WorkItemType::Feature => "feature",
            WorkItemType::Story => "story",
            WorkItemType::Task => "task",
            WorkItemType::Bug => "bug",
            WorkItemType::Spike => "spike",
            WorkItemType::Research => "research",
        }
    }
}

impl FromStr for WorkItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epic" => Ok(WorkItemType::Epic),
            "feature" => Ok(WorkItemType::Feature),
            "story" => Ok(WorkItemType::Story),
            "task" => Ok(WorkItemType::Task),
            "bug" => Ok(WorkItemType::Bug),
            "spike" => Ok(WorkItemType::Spike),
            "research" => Ok(WorkItemType::Research),
            other => Err(format!("unknown work item type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    InReview,
    Blocked,
    Done,
    Cancelled,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Backlog => "backlog",
            WorkItemStatus::Todo => "todo",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::InReview => "in_review",
            WorkItemStatus::Blocked => "blocked",
            WorkItemStatus::Done => "done",
            WorkItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            WorkItemStatus::Backlog => "·",
            WorkItemStatus::Todo => "☐",
            WorkItemStatus::InProgress => "●",
            WorkItemStatus::InReview => "◐",
            WorkItemStatus::Blocked => "⊘",
            WorkItemStatus::Done => "✓",
            WorkItemStatus::Cancelled => "✗",
        }
    }
}

impl FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(WorkItemStatus::Backlog),
            "todo" => Ok(WorkItemStatus::Todo),
            "in_progress" => Ok(WorkItemStatus::InProgress),
            "in_review" => Ok(WorkItemStatus::InReview),
            "blocked" => Ok(WorkItemStatus::Blocked),
            "done" => Ok(WorkItemStatus::Done),
            "cancelled" => Ok(WorkItemStatus::Cancelled),
            other => Err(format!("unknown work item status '{other}'")),
        }
    }
}

/// Open attribute bag attached to projects and work items.
///
/// Serialized as a plain JSON object. Updates go through [`CustomFields::merge`]:
/// incoming keys overwrite, an incoming `null` removes the key, and keys the
/// incoming map does not mention are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomFields(BTreeMap<String, Value>);

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn merge(&mut self, incoming: &CustomFields) {
        for (key, value) in &incoming.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

impl FromIterator<(String, Value)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        CustomFields(iter.into_iter().collect())
    }
}

fn default_project_type() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default = "default_project_type")]
    pub kind: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    #[serde(default, skip_serializing_if = "CustomFields::is_empty")]
    pub custom_fields: CustomFields,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Project {
            id: String::new(),
            name: name.into(),
            description: None,
            kind: default_project_type(),
            status: ProjectStatus::default(),
            priority: Priority::default(),
            estimated_effort: None,
            tags: Vec::new(),
            created_date: chrono::Utc::now().to_rfc3339(),
            target_date: None,
            owner: None,
            stakeholders: Vec::new(),
            custom_fields: CustomFields::new(),
        }
    }
}

/// A project as the store keeps it, with its bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProject {
    #[serde(flatten)]
    pub project: Project,
    pub last_accessed: String,
    pub is_active: bool,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: WorkItemType,
    #[serde(default)]
    pub status: WorkItemStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub updated_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "CustomFields::is_empty")]
    pub custom_fields: CustomFields,
}

impl WorkItem {
    pub fn new(title: impl Into<String>, kind: WorkItemType) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        WorkItem {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            kind,
            status: WorkItemStatus::default(),
            priority: Priority::default(),
            parent_id: None,
            estimated_effort: None,
            assignee: None,
            created_date: now.clone(),
            updated_date: now,
            start_date: None,
            due_date: None,
            completed_date: None,
            tags: Vec::new(),
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
            custom_fields: CustomFields::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: WorkItemStatus) -> Self {
        self.status = status;
        self
    }
}

/// Derived per-project aggregate, recomputed by the store on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub total_work_items: u32,
    pub completed_work_items: u32,
    pub total_estimated_effort: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

/// Payload for creating or replacing a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectData {
    pub project: Project,
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
}

/// A project read back from the store, stripped of bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub project: Project,
    pub work_items: Vec<WorkItem>,
    pub metadata: Metadata,
}

impl ProjectSnapshot {
    pub fn into_data(self) -> ProjectData {
        ProjectData {
            project: self.project,
            work_items: self.work_items,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] ({})",
            self.status.symbol(),
            self.title,
            self.kind.as_str(),
            self.status.as_str()
        )
    }
}
