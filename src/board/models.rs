use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::BoardError;

// ── Entity kinds ──────────────────────────────────────────────────────

/// The four levels of the containment hierarchy, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Workspace,
    Project,
    Ticket,
    Task,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Workspace,
        EntityKind::Project,
        EntityKind::Ticket,
        EntityKind::Task,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Self::Workspace => "workspaces",
            Self::Project => "projects",
            Self::Ticket => "tickets",
            Self::Task => "tasks",
        }
    }

    /// The owning level, `None` for the root.
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            Self::Workspace => None,
            Self::Project => Some(Self::Workspace),
            Self::Ticket => Some(Self::Project),
            Self::Task => Some(Self::Ticket),
        }
    }

    pub fn child(&self) -> Option<EntityKind> {
        match self {
            Self::Workspace => Some(Self::Project),
            Self::Project => Some(Self::Ticket),
            Self::Ticket => Some(Self::Task),
            Self::Task => None,
        }
    }

    /// Column in this kind's table holding the parent id.
    pub fn parent_column(&self) -> Option<&'static str> {
        match self {
            Self::Workspace => None,
            Self::Project => Some("workspace_id"),
            Self::Ticket => Some("project_id"),
            Self::Task => Some("ticket_id"),
        }
    }

    /// Every level strictly below this one, nearest first.
    pub fn descendants(&self) -> Vec<EntityKind> {
        let mut out = Vec::new();
        let mut next = self.child();
        while let Some(kind) = next {
            out.push(kind);
            next = kind.child();
        }
        out
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "Workspace",
            Self::Project => "Project",
            Self::Ticket => "Ticket",
            Self::Task => "Task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Enumerations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    Completed,
    OnHold,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::OnHold => "ON_HOLD",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLANNING" => Ok(Self::Planning),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "ON_HOLD" => Ok(Self::OnHold),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Review,
    Testing,
    Done,
    Closed,
    Blocked,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Review => "REVIEW",
            Self::Testing => "TESTING",
            Self::Done => "DONE",
            Self::Closed => "CLOSED",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "REVIEW" => Ok(Self::Review),
            "TESTING" => Ok(Self::Testing),
            "DONE" => Ok(Self::Done),
            "CLOSED" => Ok(Self::Closed),
            "BLOCKED" => Ok(Self::Blocked),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Review => "REVIEW",
            Self::Done => "DONE",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "REVIEW" => Ok(Self::Review),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

// ── Entities ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub ticket_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    /// Stamped when the status moves into `DONE`. Never cleared afterwards.
    pub completed_at: Option<DateTime<Utc>>,
    pub assignee_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
}

// ── Create payloads ───────────────────────────────────────────────────
//
// Unknown fields (id, timestamps, audit columns) are ignored by serde, so a
// client can never set them.

#[derive(Debug, Clone, Deserialize)]
pub struct NewWorkspace {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub workspace_id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicket {
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: Priority,
    pub assignee_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub ticket_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee_id: Option<i64>,
}

// ── Merge-patch payloads ──────────────────────────────────────────────
//
// `None` means "leave untouched". Nullable columns use `Option<Option<T>>`
// so that an explicit `null` clears the value.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspacePatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<i64>>,
}

/// Distinguishes a present `null` (`Some(None)`) from an absent key (`None`,
/// via `#[serde(default)]`).
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ── Field validation ──────────────────────────────────────────────────

pub const WORKSPACE_NAME_MAX: usize = 100;
pub const WORKSPACE_DESCRIPTION_MAX: usize = 500;
pub const PROJECT_NAME_MAX: usize = 200;
pub const PROJECT_DESCRIPTION_MAX: usize = 1000;
pub const TITLE_MAX: usize = 300;
pub const ITEM_DESCRIPTION_MAX: usize = 2000;

/// Payload checks run by the mapping layer before anything touches the store.
pub trait Validate {
    fn validate(&self) -> Result<(), BoardError>;
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), BoardError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(BoardError::validation(
            field,
            format!("length must be between {} and {} characters, got {}", min, max, len),
        ));
    }
    Ok(())
}

fn check_optional_len(field: &str, value: Option<&str>, max: usize) -> Result<(), BoardError> {
    match value {
        Some(v) => check_len(field, v, 0, max),
        None => Ok(()),
    }
}

pub(crate) fn check_positive(field: &str, value: Option<i64>) -> Result<(), BoardError> {
    match value {
        Some(v) if v <= 0 => Err(BoardError::validation(
            field,
            format!("must be greater than 0, got {}", v),
        )),
        _ => Ok(()),
    }
}

impl Validate for NewWorkspace {
    fn validate(&self) -> Result<(), BoardError> {
        check_len("name", &self.name, 1, WORKSPACE_NAME_MAX)?;
        check_optional_len("description", self.description.as_deref(), WORKSPACE_DESCRIPTION_MAX)
    }
}

impl Validate for NewProject {
    fn validate(&self) -> Result<(), BoardError> {
        check_positive("workspace_id", Some(self.workspace_id))?;
        check_len("name", &self.name, 1, PROJECT_NAME_MAX)?;
        check_optional_len("description", self.description.as_deref(), PROJECT_DESCRIPTION_MAX)
    }
}

impl Validate for NewTicket {
    fn validate(&self) -> Result<(), BoardError> {
        check_positive("project_id", Some(self.project_id))?;
        check_len("title", &self.title, 1, TITLE_MAX)?;
        check_optional_len("description", self.description.as_deref(), ITEM_DESCRIPTION_MAX)?;
        check_positive("assignee_id", self.assignee_id)
    }
}

impl Validate for NewTask {
    fn validate(&self) -> Result<(), BoardError> {
        check_positive("ticket_id", Some(self.ticket_id))?;
        check_len("title", &self.title, 1, TITLE_MAX)?;
        check_optional_len("description", self.description.as_deref(), ITEM_DESCRIPTION_MAX)?;
        check_positive("assignee_id", self.assignee_id)
    }
}

impl Validate for WorkspacePatch {
    fn validate(&self) -> Result<(), BoardError> {
        if let Some(name) = &self.name {
            check_len("name", name, 1, WORKSPACE_NAME_MAX)?;
        }
        check_optional_len(
            "description",
            self.description.as_ref().and_then(|d| d.as_deref()),
            WORKSPACE_DESCRIPTION_MAX,
        )
    }
}

impl Validate for ProjectPatch {
    fn validate(&self) -> Result<(), BoardError> {
        if let Some(name) = &self.name {
            check_len("name", name, 1, PROJECT_NAME_MAX)?;
        }
        check_optional_len(
            "description",
            self.description.as_ref().and_then(|d| d.as_deref()),
            PROJECT_DESCRIPTION_MAX,
        )
    }
}

impl Validate for TicketPatch {
    fn validate(&self) -> Result<(), BoardError> {
        if let Some(title) = &self.title {
            check_len("title", title, 1, TITLE_MAX)?;
        }
        check_optional_len(
            "description",
            self.description.as_ref().and_then(|d| d.as_deref()),
            ITEM_DESCRIPTION_MAX,
        )?;
        check_positive("assignee_id", self.assignee_id.flatten())
    }
}

impl Validate for TaskPatch {
    fn validate(&self) -> Result<(), BoardError> {
        if let Some(title) = &self.title {
            check_len("title", title, 1, TITLE_MAX)?;
        }
        check_optional_len(
            "description",
            self.description.as_ref().and_then(|d| d.as_deref()),
            ITEM_DESCRIPTION_MAX,
        )?;
        check_positive("assignee_id", self.assignee_id.flatten())
    }
}

// ── Merge-patch application ───────────────────────────────────────────

impl Workspace {
    pub fn apply(&mut self, patch: &WorkspacePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
    }
}

impl Project {
    pub fn apply(&mut self, patch: &ProjectPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
    }
}

impl Ticket {
    pub fn apply(&mut self, patch: &TicketPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(assignee_id) = patch.assignee_id {
            self.assignee_id = assignee_id;
        }
    }
}

impl Task {
    /// Applies the patch; a status transition into `DONE` stamps
    /// `completed_at` with `now`. Leaving `DONE` keeps the old stamp.
    pub fn apply(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            if status == TaskStatus::Done && self.status != TaskStatus::Done {
                self.completed_at = Some(now);
            }
            self.status = status;
        }
        if let Some(assignee_id) = patch.assignee_id {
            self.assignee_id = assignee_id;
        }
    }
}

// ── Listing ───────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Bounded window over a filtered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Result<Self, BoardError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let offset = offset.unwrap_or(0);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(BoardError::validation(
                "limit",
                format!("must be between 1 and {}, got {}", MAX_PAGE_LIMIT, limit),
            ));
        }
        if offset < 0 {
            return Err(BoardError::validation(
                "offset",
                format!("must be 0 or greater, got {}", offset),
            ));
        }
        Ok(Self { limit, offset })
    }
}

/// Optional filters shared by every collection. Which ones apply depends on
/// the kind: workspaces take none, tasks take no priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter<S> {
    pub parent_id: Option<i64>,
    pub status: Option<S>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Rows matching the filters, ignoring limit/offset.
    pub total: i64,
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

/// Rows removed by a cascading delete, per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub workspaces: usize,
    pub projects: usize,
    pub tickets: usize,
    pub tasks: usize,
}

impl CascadeReport {
    pub fn record(&mut self, kind: EntityKind, removed: usize) {
        match kind {
            EntityKind::Workspace => self.workspaces += removed,
            EntityKind::Project => self.projects += removed,
            EntityKind::Ticket => self.tickets += removed,
            EntityKind::Task => self.tasks += removed,
        }
    }

    pub fn total(&self) -> usize {
        self.workspaces + self.projects + self.tickets + self.tasks
    }
}
