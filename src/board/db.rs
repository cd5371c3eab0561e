use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use super::models::*;
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously.
    #[cfg(test)]
    pub(crate) fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::Error::new(BoardError::LockPoisoned))
    }
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so that text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp '{}'", raw))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    T::from_str(raw).map_err(|e| anyhow::anyhow!(e))
}

/// The mutation instant for a row last touched at `previous`. Never earlier
/// than `previous`, so `updated_at` cannot go backwards on clock skew.
fn mutation_instant(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}

/// Nested id selector for every `kind` row underneath the `root` row bound
/// to `?1`. For `root == kind` this is just `?1`.
fn ids_under(root: EntityKind, kind: EntityKind) -> String {
    if root == kind {
        return "?1".to_string();
    }
    match (kind.parent(), kind.parent_column()) {
        (Some(parent), Some(column)) => format!(
            "SELECT id FROM {} WHERE {} IN ({})",
            kind.table(),
            column,
            ids_under(root, parent)
        ),
        // Unreachable for kinds below `root`; selects nothing otherwise.
        _ => "SELECT NULL WHERE 0".to_string(),
    }
}

const WORKSPACE_COLUMNS: &str =
    "id, name, description, created_at, updated_at, created_by, updated_by";
const PROJECT_COLUMNS: &str = "id, workspace_id, name, description, status, priority, created_at, updated_at, created_by, updated_by";
const TICKET_COLUMNS: &str = "id, project_id, title, description, status, priority, assignee_id, created_at, updated_at, created_by, updated_by";
const TASK_COLUMNS: &str = "id, ticket_id, title, description, status, completed_at, assignee_id, created_at, updated_at, created_by, updated_by";

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    /// Parent linkage columns are plain indexed integers. The schema declares
    /// no foreign keys so each table can move to its own database later;
    /// integrity is enforced by `validate_parent_exists` and `cascade_delete`.
    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workspaces (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_by INTEGER NOT NULL,
                    updated_by INTEGER
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'PLANNING',
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_by INTEGER NOT NULL,
                    updated_by INTEGER
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'OPEN',
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    assignee_id INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_by INTEGER NOT NULL,
                    updated_by INTEGER
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'TODO',
                    completed_at TEXT,
                    assignee_id INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_by INTEGER NOT NULL,
                    updated_by INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_workspaces_name ON workspaces(name);
                CREATE INDEX IF NOT EXISTS idx_workspaces_created_by ON workspaces(created_by);

                CREATE INDEX IF NOT EXISTS idx_projects_workspace ON projects(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
                CREATE INDEX IF NOT EXISTS idx_projects_priority ON projects(priority);
                CREATE INDEX IF NOT EXISTS idx_projects_created_by ON projects(created_by);

                CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets(project_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
                CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority);
                CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON tickets(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_created_by ON tickets(created_by);

                CREATE INDEX IF NOT EXISTS idx_tasks_ticket ON tasks(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
                CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_created_by ON tasks(created_by);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Hierarchy integrity ───────────────────────────────────────────

    pub fn exists(&self, kind: EntityKind, id: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", kind.table());
        let found = self
            .conn
            .query_row(&sql, params![id], |_| Ok(()))
            .optional()
            .with_context(|| format!("Failed to look up {} {}", kind, id))?;
        Ok(found.is_some())
    }

    /// Fails with `NotFound(parent kind, parent_id)` unless the row that a new
    /// `child` would reference exists. Call inside the create transaction.
    pub fn validate_parent_exists(&self, child: EntityKind, parent_id: i64) -> Result<()> {
        let parent = child
            .parent()
            .with_context(|| format!("{} has no parent level", child))?;
        if !self.exists(parent, parent_id)? {
            return Err(BoardError::not_found(parent, parent_id).into());
        }
        Ok(())
    }

    /// Removes the `kind` row `id` and every descendant in one transaction,
    /// deepest level first. A missing root is `NotFound`; levels that are
    /// already gone (e.g. after an overlapping delete) simply count zero.
    pub fn cascade_delete(&self, kind: EntityKind, id: i64) -> Result<CascadeReport> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if !self.exists(kind, id)? {
            return Err(BoardError::not_found(kind, id).into());
        }

        let mut report = CascadeReport::default();
        for level in kind.descendants().into_iter().rev() {
            let sql = format!(
                "DELETE FROM {} WHERE id IN ({})",
                level.table(),
                ids_under(kind, level)
            );
            let removed = tx
                .execute(&sql, params![id])
                .with_context(|| format!("Failed to delete {} rows under {} {}", level, kind, id))?;
            report.record(level, removed);
        }

        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        let removed = tx
            .execute(&sql, params![id])
            .with_context(|| format!("Failed to delete {} {}", kind, id))?;
        report.record(kind, removed);

        tx.commit().context("Failed to commit cascade delete")?;
        info!(
            kind = %kind,
            id,
            removed = report.total(),
            projects = report.projects,
            tickets = report.tickets,
            tasks = report.tasks,
            "cascade delete complete"
        );
        Ok(report)
    }

    /// Rows of `kind` whose parent no longer exists. Always empty while every
    /// write goes through this store.
    #[cfg(test)]
    pub(crate) fn orphans(&self, kind: EntityKind) -> Result<Vec<i64>> {
        let (Some(parent), Some(column)) = (kind.parent(), kind.parent_column()) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT c.id FROM {child} c WHERE NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.id = c.{column}) ORDER BY c.id",
            child = kind.table(),
            parent = parent.table(),
            column = column,
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare orphans")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .context("Failed to query orphans")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read orphan id")?);
        }
        Ok(ids)
    }

    pub fn count(&self, kind: EntityKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .with_context(|| format!("Failed to count {}", kind.table()))
    }

    // ── Paging ────────────────────────────────────────────────────────

    /// Shared filtered/paged SELECT. `conditions` pairs a column with the
    /// value it must equal; absent filters are simply not listed.
    ///
    /// Rows come back newest first. Rows stamped in the same microsecond are
    /// ordered by `id` descending rather than insertion order, so a page
    /// never mixes directions.
    fn list_page<T>(
        &self,
        kind: EntityKind,
        columns: &str,
        conditions: Vec<(&'static str, Value)>,
        page: PageRequest,
        map: impl Fn(&Row<'_>) -> Result<T>,
    ) -> Result<Page<T>> {
        let mut clause = String::new();
        let mut values = Vec::with_capacity(conditions.len() + 2);
        for (i, (column, value)) in conditions.into_iter().enumerate() {
            clause.push_str(if i == 0 { " WHERE " } else { " AND " });
            clause.push_str(&format!("{} = ?{}", column, i + 1));
            values.push(value);
        }

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", kind.table(), clause);
        let total: i64 = self
            .conn
            .query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))
            .with_context(|| format!("Failed to count {}", kind.table()))?;

        let n = values.len();
        let select_sql = format!(
            "SELECT {} FROM {}{} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            columns,
            kind.table(),
            clause,
            n + 1,
            n + 2
        );
        values.push(Value::Integer(page.limit));
        values.push(Value::Integer(page.offset));

        let mut stmt = self
            .conn
            .prepare(&select_sql)
            .with_context(|| format!("Failed to prepare list {}", kind.table()))?;
        let mut rows = stmt
            .query(params_from_iter(values.iter()))
            .with_context(|| format!("Failed to query {}", kind.table()))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            items.push(map(row)?);
        }
        debug!(kind = %kind, total, returned = items.len(), "listed page");

        Ok(Page {
            total,
            items,
            limit: page.limit,
            offset: page.offset,
        })
    }

    fn fetch_one<T>(
        &self,
        kind: EntityKind,
        columns: &str,
        id: i64,
        map: impl Fn(&Row<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", columns, kind.table());
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare get {}", kind))?;
        let mut rows = stmt
            .query(params![id])
            .with_context(|| format!("Failed to query {} {}", kind, id))?;
        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(map(row)?)),
            None => Ok(None),
        }
    }

    // ── Workspace CRUD ────────────────────────────────────────────────

    pub fn create_workspace(&self, new: &NewWorkspace, actor: i64) -> Result<Workspace> {
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO workspaces (name, description, created_at, updated_at, created_by)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![new.name, new.description, now, actor],
            )
            .context("Failed to insert workspace")?;
        let id = self.conn.last_insert_rowid();
        info!(id, actor, "workspace created");
        self.get_workspace(id)?
            .context("Workspace not found after insert")
    }

    pub fn get_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        self.fetch_one(EntityKind::Workspace, WORKSPACE_COLUMNS, id, WorkspaceRow::read)
    }

    pub fn list_workspaces(&self, page: PageRequest) -> Result<Page<Workspace>> {
        self.list_page(
            EntityKind::Workspace,
            WORKSPACE_COLUMNS,
            Vec::new(),
            page,
            WorkspaceRow::read,
        )
    }

    pub fn update_workspace(&self, id: i64, patch: &WorkspacePatch, actor: i64) -> Result<Workspace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut workspace = self
            .get_workspace(id)?
            .ok_or(BoardError::not_found(EntityKind::Workspace, id))?;
        workspace.apply(patch);
        let now = mutation_instant(workspace.updated_at);
        tx.execute(
            "UPDATE workspaces SET name = ?1, description = ?2, updated_at = ?3, updated_by = ?4 WHERE id = ?5",
            params![workspace.name, workspace.description, format_timestamp(&now), actor, id],
        )
        .context("Failed to update workspace")?;
        tx.commit().context("Failed to commit workspace update")?;
        self.get_workspace(id)?
            .context("Workspace not found after update")
    }

    pub fn delete_workspace(&self, id: i64) -> Result<CascadeReport> {
        self.cascade_delete(EntityKind::Workspace, id)
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(&self, new: &NewProject, actor: i64) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.validate_parent_exists(EntityKind::Project, new.workspace_id)?;
        let now = format_timestamp(&Utc::now());
        tx.execute(
            "INSERT INTO projects (workspace_id, name, description, status, priority, created_at, updated_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
            params![
                new.workspace_id,
                new.name,
                new.description,
                new.status.as_str(),
                new.priority.as_str(),
                now,
                actor
            ],
        )
        .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        tx.commit().context("Failed to commit project insert")?;
        info!(id, workspace_id = new.workspace_id, actor, "project created");
        self.get_project(id)?.context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.fetch_one(EntityKind::Project, PROJECT_COLUMNS, id, ProjectRow::read)
    }

    pub fn list_projects(
        &self,
        filter: &ListFilter<ProjectStatus>,
        page: PageRequest,
    ) -> Result<Page<Project>> {
        let mut conditions = Vec::new();
        if let Some(workspace_id) = filter.parent_id {
            conditions.push(("workspace_id", Value::Integer(workspace_id)));
        }
        if let Some(status) = filter.status {
            conditions.push(("status", Value::Text(status.as_str().to_string())));
        }
        if let Some(priority) = filter.priority {
            conditions.push(("priority", Value::Text(priority.as_str().to_string())));
        }
        self.list_page(
            EntityKind::Project,
            PROJECT_COLUMNS,
            conditions,
            page,
            ProjectRow::read,
        )
    }

    pub fn update_project(&self, id: i64, patch: &ProjectPatch, actor: i64) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut project = self
            .get_project(id)?
            .ok_or(BoardError::not_found(EntityKind::Project, id))?;
        project.apply(patch);
        let now = mutation_instant(project.updated_at);
        tx.execute(
            "UPDATE projects SET name = ?1, description = ?2, status = ?3, priority = ?4, updated_at = ?5, updated_by = ?6
             WHERE id = ?7",
            params![
                project.name,
                project.description,
                project.status.as_str(),
                project.priority.as_str(),
                format_timestamp(&now),
                actor,
                id
            ],
        )
        .context("Failed to update project")?;
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)?.context("Project not found after update")
    }

    pub fn delete_project(&self, id: i64) -> Result<CascadeReport> {
        self.cascade_delete(EntityKind::Project, id)
    }

    // ── Ticket CRUD ───────────────────────────────────────────────────

    pub fn create_ticket(&self, new: &NewTicket, actor: i64) -> Result<Ticket> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.validate_parent_exists(EntityKind::Ticket, new.project_id)?;
        let now = format_timestamp(&Utc::now());
        tx.execute(
            "INSERT INTO tickets (project_id, title, description, status, priority, assignee_id, created_at, updated_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
            params![
                new.project_id,
                new.title,
                new.description,
                new.status.as_str(),
                new.priority.as_str(),
                new.assignee_id,
                now,
                actor
            ],
        )
        .context("Failed to insert ticket")?;
        let id = self.conn.last_insert_rowid();
        tx.commit().context("Failed to commit ticket insert")?;
        info!(id, project_id = new.project_id, actor, "ticket created");
        self.get_ticket(id)?.context("Ticket not found after insert")
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        self.fetch_one(EntityKind::Ticket, TICKET_COLUMNS, id, TicketRow::read)
    }

    pub fn list_tickets(
        &self,
        filter: &ListFilter<TicketStatus>,
        page: PageRequest,
    ) -> Result<Page<Ticket>> {
        let mut conditions = Vec::new();
        if let Some(project_id) = filter.parent_id {
            conditions.push(("project_id", Value::Integer(project_id)));
        }
        if let Some(status) = filter.status {
            conditions.push(("status", Value::Text(status.as_str().to_string())));
        }
        if let Some(priority) = filter.priority {
            conditions.push(("priority", Value::Text(priority.as_str().to_string())));
        }
        self.list_page(
            EntityKind::Ticket,
            TICKET_COLUMNS,
            conditions,
            page,
            TicketRow::read,
        )
    }

    pub fn update_ticket(&self, id: i64, patch: &TicketPatch, actor: i64) -> Result<Ticket> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut ticket = self
            .get_ticket(id)?
            .ok_or(BoardError::not_found(EntityKind::Ticket, id))?;
        ticket.apply(patch);
        let now = mutation_instant(ticket.updated_at);
        tx.execute(
            "UPDATE tickets SET title = ?1, description = ?2, status = ?3, priority = ?4, assignee_id = ?5,
                    updated_at = ?6, updated_by = ?7
             WHERE id = ?8",
            params![
                ticket.title,
                ticket.description,
                ticket.status.as_str(),
                ticket.priority.as_str(),
                ticket.assignee_id,
                format_timestamp(&now),
                actor,
                id
            ],
        )
        .context("Failed to update ticket")?;
        tx.commit().context("Failed to commit ticket update")?;
        self.get_ticket(id)?.context("Ticket not found after update")
    }

    pub fn delete_ticket(&self, id: i64) -> Result<CascadeReport> {
        self.cascade_delete(EntityKind::Ticket, id)
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    pub fn create_task(&self, new: &NewTask, actor: i64) -> Result<Task> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.validate_parent_exists(EntityKind::Task, new.ticket_id)?;
        let now = format_timestamp(&Utc::now());
        let completed_at = (new.status == TaskStatus::Done).then(|| now.clone());
        tx.execute(
            "INSERT INTO tasks (ticket_id, title, description, status, completed_at, assignee_id, created_at, updated_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
            params![
                new.ticket_id,
                new.title,
                new.description,
                new.status.as_str(),
                completed_at,
                new.assignee_id,
                now,
                actor
            ],
        )
        .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        tx.commit().context("Failed to commit task insert")?;
        info!(id, ticket_id = new.ticket_id, actor, "task created");
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.fetch_one(EntityKind::Task, TASK_COLUMNS, id, TaskRow::read)
    }

    pub fn list_tasks(&self, filter: &ListFilter<TaskStatus>, page: PageRequest) -> Result<Page<Task>> {
        let mut conditions = Vec::new();
        if let Some(ticket_id) = filter.parent_id {
            conditions.push(("ticket_id", Value::Integer(ticket_id)));
        }
        if let Some(status) = filter.status {
            conditions.push(("status", Value::Text(status.as_str().to_string())));
        }
        self.list_page(EntityKind::Task, TASK_COLUMNS, conditions, page, TaskRow::read)
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch, actor: i64) -> Result<Task> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut task = self
            .get_task(id)?
            .ok_or(BoardError::not_found(EntityKind::Task, id))?;
        let now = mutation_instant(task.updated_at);
        task.apply(patch, now);
        tx.execute(
            "UPDATE tasks SET title = ?1, description = ?2, status = ?3, completed_at = ?4, assignee_id = ?5,
                    updated_at = ?6, updated_by = ?7
             WHERE id = ?8",
            params![
                task.title,
                task.description,
                task.status.as_str(),
                task.completed_at.as_ref().map(format_timestamp),
                task.assignee_id,
                format_timestamp(&now),
                actor,
                id
            ],
        )
        .context("Failed to update task")?;
        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)?.context("Task not found after update")
    }

    pub fn delete_task(&self, id: i64) -> Result<CascadeReport> {
        self.cascade_delete(EntityKind::Task, id)
    }
}

// ── Row conversion ────────────────────────────────────────────────────

/// Intermediate row structs hold the raw column text before enum and
/// timestamp parsing, so a bad stored value surfaces as a contextual error
/// rather than a rusqlite type error.
struct WorkspaceRow {
    id: i64,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
    created_by: i64,
    updated_by: Option<i64>,
}

impl WorkspaceRow {
    fn read(row: &Row<'_>) -> Result<Workspace> {
        let r = Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            created_by: row.get(5)?,
            updated_by: row.get(6)?,
        };
        r.into_workspace()
    }

    fn into_workspace(self) -> Result<Workspace> {
        Ok(Workspace {
            id: self.id,
            name: self.name,
            description: self.description,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

struct ProjectRow {
    id: i64,
    workspace_id: i64,
    name: String,
    description: Option<String>,
    status: String,
    priority: String,
    created_at: String,
    updated_at: String,
    created_by: i64,
    updated_by: Option<i64>,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> Result<Project> {
        let r = Self {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            created_by: row.get(8)?,
            updated_by: row.get(9)?,
        };
        r.into_project()
    }

    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: self.id,
            workspace_id: self.workspace_id,
            name: self.name,
            description: self.description,
            status: parse_enum(&self.status).context("Failed to parse project status")?,
            priority: parse_enum(&self.priority).context("Failed to parse project priority")?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

struct TicketRow {
    id: i64,
    project_id: i64,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    assignee_id: Option<i64>,
    created_at: String,
    updated_at: String,
    created_by: i64,
    updated_by: Option<i64>,
}

impl TicketRow {
    fn read(row: &Row<'_>) -> Result<Ticket> {
        let r = Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            assignee_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            created_by: row.get(9)?,
            updated_by: row.get(10)?,
        };
        r.into_ticket()
    }

    fn into_ticket(self) -> Result<Ticket> {
        Ok(Ticket {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            status: parse_enum(&self.status).context("Failed to parse ticket status")?,
            priority: parse_enum(&self.priority).context("Failed to parse ticket priority")?,
            assignee_id: self.assignee_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

struct TaskRow {
    id: i64,
    ticket_id: i64,
    title: String,
    description: Option<String>,
    status: String,
    completed_at: Option<String>,
    assignee_id: Option<i64>,
    created_at: String,
    updated_at: String,
    created_by: i64,
    updated_by: Option<i64>,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> Result<Task> {
        let r = Self {
            id: row.get(0)?,
            ticket_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            completed_at: row.get(5)?,
            assignee_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            created_by: row.get(9)?,
            updated_by: row.get(10)?,
        };
        r.into_task()
    }

    fn into_task(self) -> Result<Task> {
        let completed_at = match self.completed_at {
            Some(raw) => Some(parse_timestamp(&raw)?),
            None => None,
        };
        Ok(Task {
            id: self.id,
            ticket_id: self.ticket_id,
            title: self.title,
            description: self.description,
            status: parse_enum(&self.status).context("Failed to parse task status")?,
            completed_at,
            assignee_id: self.assignee_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
