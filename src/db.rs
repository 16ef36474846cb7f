//! SQLite database with Diesel ORM
//!
//! Stores stories, their tasks, tags and comments, plus the reference data
//! (users, projects, branches, milestones) tasks point at. Tables are created
//! on open.

use crate::audit;
use crate::model::{BranchStatus, CommentType, TaskStatus};
use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

/// Walk up directory tree to find .storyboard folder (like git finds .git)
/// Can be overridden with STORYBOARD_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("STORYBOARD_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let storyboard_dir = dir.join(".storyboard");
            if storyboard_dir.is_dir() {
                return storyboard_dir.join("storyboard.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // storyboard init creates it here
    std::path::PathBuf::from(".storyboard/storyboard.db")
}

/// Current schema version for storyboard
pub const CURRENT_SCHEMA: StoryboardSchema = StoryboardSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "story-tracker",
    features: &[
        "users",
        "projects",
        "branches",
        "milestones",
        "stories",
        "tasks",
        "story_tags",
        "comments",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoryboardSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoryboardSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for StoryboardSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
struct NewSchemaVersion<'a> {
    version: &'a str,
    name: &'a str,
    features: &'a str,
    introduced_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    username: &'a str,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = projects)]
struct NewProject<'a> {
    name: &'a str,
    title: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: i32,
    pub name: String,
    pub title: String,
}

#[derive(Insertable)]
#[diesel(table_name = branches)]
struct NewBranch<'a> {
    name: &'a str,
    short_name: &'a str,
    status: &'a str,
    release_date: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = branches)]
pub struct Branch {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    pub status: String,
    pub release_date: Option<String>,
}

impl Branch {
    pub fn is_master(&self) -> bool {
        self.status == BranchStatus::Master.code()
    }
}

#[derive(Insertable)]
#[diesel(table_name = milestones)]
struct NewMilestone<'a> {
    name: &'a str,
    branch_id: i32,
    released: bool,
    undefined: bool,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = milestones)]
pub struct Milestone {
    pub id: i32,
    pub name: String,
    pub branch_id: i32,
    pub released: bool,
    pub undefined: bool,
}

#[derive(Insertable)]
#[diesel(table_name = stories)]
struct NewStory<'a> {
    title: &'a str,
    description: &'a str,
    creator_id: i32,
    is_bug: bool,
    priority: i32,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = stories)]
pub struct Story {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub creator_id: i32,
    pub is_bug: bool,
    pub priority: i32,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow<'a> {
    story_id: i32,
    title: &'a str,
    project_id: i32,
    milestone_id: i32,
    status: &'a str,
    assignee_id: Option<i32>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: i32,
    pub story_id: i32,
    pub title: String,
    pub project_id: i32,
    pub milestone_id: i32,
    pub status: String,
    pub assignee_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = story_tags)]
struct NewStoryTag<'a> {
    story_id: i32,
    name: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
struct NewComment<'a> {
    story_id: i32,
    action: Option<&'a str>,
    author_id: i32,
    comment_type: &'a str,
    content: &'a str,
    posted_date: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub story_id: i32,
    pub action: Option<String>,
    pub author_id: i32,
    pub comment_type: String,
    pub content: String,
    pub posted_date: String,
}

// ============================================================================
// Write Parameters
// ============================================================================

/// A comment to append to a story's history.
#[derive(Debug, Clone, Copy)]
pub struct CommentDraft<'a> {
    pub story_id: i32,
    pub author_id: i32,
    pub comment_type: CommentType,
    pub action: Option<&'a str>,
    pub content: &'a str,
}

/// A new story with its initial tasks and tags.
#[derive(Debug, Clone, Copy)]
pub struct StoryDraft<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub creator_id: i32,
    pub is_bug: bool,
    /// One task is opened per project
    pub project_ids: &'a [i32],
    /// Milestone for those tasks; required when `project_ids` is non-empty
    pub milestone_id: Option<i32>,
    pub tags: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewTask<'a> {
    pub story_id: i32,
    pub title: &'a str,
    pub project_id: i32,
    pub milestone_id: i32,
}

/// Replacement values for the editable task fields.
#[derive(Debug, Clone, Copy)]
pub struct TaskUpdate<'a> {
    pub title: &'a str,
    pub milestone_id: i32,
    pub status: TaskStatus,
    pub assignee_id: Option<i32>,
}

// ============================================================================
// Read Models
// ============================================================================

/// A task together with everything needed to show it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub project: Project,
    pub milestone: Milestone,
    pub branch: Branch,
    pub assignee: Option<User>,
    pub name: String,
    pub status_label: String,
}

impl TaskDetail {
    fn new(task: Task, project: Project, milestone: Milestone, branch: Branch, assignee: Option<User>) -> Self {
        let name = audit::task_name(&project.name, &branch.short_name, &task.title);
        let status_label = TaskStatus::display(&task.status);
        Self {
            task,
            project,
            milestone,
            branch,
            assignee,
            name,
            status_label,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommentDetail {
    pub comment: Comment,
    pub author: User,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// SQLite leaves foreign keys off per connection unless asked.
#[derive(Debug)]
struct EnforceForeignKeys;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for EnforceForeignKeys {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)?;
    Ok(id)
}

fn insert_comment(conn: &mut SqliteConnection, draft: &CommentDraft<'_>) -> Result<i32> {
    let posted = now();
    let row = NewComment {
        story_id: draft.story_id,
        action: draft.action,
        author_id: draft.author_id,
        comment_type: draft.comment_type.as_str(),
        content: draft.content,
        posted_date: &posted,
    };
    diesel::insert_into(comments::table)
        .values(&row)
        .execute(conn)?;
    last_insert_id(conn)
}

fn insert_tags(conn: &mut SqliteConnection, story_id: i32, tags: &BTreeSet<String>) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewStoryTag<'_>> = tags
        .iter()
        .map(|name| NewStoryTag { story_id, name })
        .collect();
    diesel::insert_into(story_tags::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}

fn load_assignees(conn: &mut SqliteConnection, rows: &[Task]) -> Result<HashMap<i32, User>> {
    let ids: Vec<i32> = rows.iter().filter_map(|t| t.assignee_id).collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users = users::table
        .filter(users::id.eq_any(ids))
        .load::<User>(conn)?;
    Ok(users.into_iter().map(|u| (u.id, u)).collect())
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Open database at default path (respects STORYBOARD_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbError::Connection(format!("{}: {}", parent.display(), e)))?;
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(EnforceForeignKeys))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        tracing::debug!(path = %path_str, schema = %CURRENT_SCHEMA, "database opened");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    /// Run `f` inside a single transaction; any error rolls everything back.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        conn.transaction(f)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS branches (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                short_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'M',
                release_date TEXT
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS milestones (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                branch_id INTEGER NOT NULL,
                released BOOLEAN NOT NULL DEFAULT 0,
                undefined BOOLEAN NOT NULL DEFAULT 0,
                FOREIGN KEY (branch_id) REFERENCES branches(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS stories (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                creator_id INTEGER NOT NULL,
                is_bug BOOLEAN NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (creator_id) REFERENCES users(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                story_id INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                project_id INTEGER NOT NULL,
                milestone_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'T',
                assignee_id INTEGER,
                FOREIGN KEY (story_id) REFERENCES stories(id),
                FOREIGN KEY (project_id) REFERENCES projects(id),
                FOREIGN KEY (milestone_id) REFERENCES milestones(id),
                FOREIGN KEY (assignee_id) REFERENCES users(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS story_tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                story_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY (story_id) REFERENCES stories(id),
                UNIQUE(story_id, name)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                story_id INTEGER NOT NULL,
                action TEXT,
                author_id INTEGER NOT NULL,
                comment_type TEXT NOT NULL DEFAULT 'comment',
                content TEXT NOT NULL DEFAULT '',
                posted_date TEXT NOT NULL,
                FOREIGN KEY (story_id) REFERENCES stories(id),
                FOREIGN KEY (author_id) REFERENCES users(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_stories_is_bug ON stories(is_bug)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tasks_story ON tasks(story_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tags_story ON story_tags(story_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_comments_story ON comments(story_id)").execute(&mut conn)?;

        self.register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &StoryboardSchema) -> Result<()> {
        let introduced_at = now();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &introduced_at,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    /// Create the `master` branch with its `undefined` milestone unless a
    /// default milestone already exists. Returns whether anything was created.
    pub fn seed_defaults(&self) -> Result<bool> {
        if self.master_undefined_milestone()?.is_some() {
            return Ok(false);
        }
        self.transaction(|conn| {
            let branch_id = match branches::table
                .filter(branches::name.eq("master"))
                .select(branches::id)
                .first::<i32>(conn)
                .optional()?
            {
                Some(id) => {
                    diesel::update(branches::table.find(id))
                        .set(branches::status.eq(BranchStatus::Master.code()))
                        .execute(conn)?;
                    id
                }
                None => {
                    diesel::insert_into(branches::table)
                        .values(&NewBranch {
                            name: "master",
                            short_name: "master",
                            status: BranchStatus::Master.code(),
                            release_date: None,
                        })
                        .execute(conn)?;
                    last_insert_id(conn)?
                }
            };
            diesel::insert_into(milestones::table)
                .values(&NewMilestone {
                    name: "undefined",
                    branch_id,
                    released: false,
                    undefined: true,
                })
                .execute(conn)?;
            Ok(true)
        })
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(&self, username: &str) -> Result<User> {
        let mut conn = self.get_conn()?;
        let created_at = now();
        diesel::insert_into(users::table)
            .values(&NewUser { username, created_at: &created_at })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        Ok(users::table.find(id).first::<User>(&mut conn)?)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let mut conn = self.get_conn()?;
        Ok(users::table
            .filter(users::username.eq(username))
            .first::<User>(&mut conn)
            .optional()?)
    }

    // ========================================================================
    // Projects, Branches, Milestones
    // ========================================================================

    pub fn create_project(&self, name: &str, title: &str) -> Result<Project> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(DbError::Validation(format!(
                "Project name '{}' must be a single non-empty word.",
                name
            )));
        }
        let mut conn = self.get_conn()?;
        diesel::insert_into(projects::table)
            .values(&NewProject { name, title })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        Ok(projects::table.find(id).first::<Project>(&mut conn)?)
    }

    pub fn find_project(&self, name: &str) -> Result<Option<Project>> {
        let mut conn = self.get_conn()?;
        Ok(projects::table
            .filter(projects::name.eq(name))
            .first::<Project>(&mut conn)
            .optional()?)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut conn = self.get_conn()?;
        Ok(projects::table
            .order(projects::name.asc())
            .load::<Project>(&mut conn)?)
    }

    pub fn create_branch(
        &self,
        name: &str,
        short_name: &str,
        status: BranchStatus,
        release_date: Option<&str>,
    ) -> Result<Branch> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(branches::table)
            .values(&NewBranch {
                name,
                short_name,
                status: status.code(),
                release_date,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        Ok(branches::table.find(id).first::<Branch>(&mut conn)?)
    }

    pub fn find_branch(&self, name: &str) -> Result<Option<Branch>> {
        let mut conn = self.get_conn()?;
        Ok(branches::table
            .filter(branches::name.eq(name))
            .first::<Branch>(&mut conn)
            .optional()?)
    }

    pub fn create_milestone(
        &self,
        name: &str,
        branch_id: i32,
        released: bool,
        undefined: bool,
    ) -> Result<Milestone> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(milestones::table)
            .values(&NewMilestone {
                name,
                branch_id,
                released,
                undefined,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        Ok(milestones::table.find(id).first::<Milestone>(&mut conn)?)
    }

    pub fn get_milestone(&self, milestone_id: i32) -> Result<Option<(Milestone, Branch)>> {
        let mut conn = self.get_conn()?;
        Ok(milestones::table
            .inner_join(branches::table)
            .filter(milestones::id.eq(milestone_id))
            .select((milestones::all_columns, branches::all_columns))
            .first::<(Milestone, Branch)>(&mut conn)
            .optional()?)
    }

    /// The catch-all milestone of the master branch that new tasks default to
    pub fn master_undefined_milestone(&self) -> Result<Option<(Milestone, Branch)>> {
        let mut conn = self.get_conn()?;
        Ok(milestones::table
            .inner_join(branches::table)
            .filter(branches::status.eq(BranchStatus::Master.code()))
            .filter(milestones::undefined.eq(true))
            .order(milestones::id.asc())
            .select((milestones::all_columns, branches::all_columns))
            .first::<(Milestone, Branch)>(&mut conn)
            .optional()?)
    }

    /// Milestones not yet released, earliest branch release date first.
    /// Branches without a date sort first (SQLite orders NULL lowest).
    pub fn unreleased_milestones(&self) -> Result<Vec<(Milestone, Branch)>> {
        let mut conn = self.get_conn()?;
        Ok(milestones::table
            .inner_join(branches::table)
            .filter(milestones::released.eq(false))
            .order((branches::release_date.asc(), milestones::id.asc()))
            .select((milestones::all_columns, branches::all_columns))
            .load::<(Milestone, Branch)>(&mut conn)?)
    }

    // ========================================================================
    // Stories
    // ========================================================================

    pub fn get_story(&self, story_id: i32) -> Result<Option<Story>> {
        let mut conn = self.get_conn()?;
        Ok(stories::table
            .find(story_id)
            .first::<Story>(&mut conn)
            .optional()?)
    }

    /// Most recent bugs (`is_bug`) or features, newest first
    pub fn recent_stories(&self, is_bug: bool, limit: i64) -> Result<Vec<Story>> {
        let mut conn = self.get_conn()?;
        Ok(stories::table
            .filter(stories::is_bug.eq(is_bug))
            .order(stories::id.desc())
            .limit(limit)
            .load::<Story>(&mut conn)?)
    }

    /// Create a story with its tasks, tags and the creation comment in one go.
    pub fn create_story(&self, draft: &StoryDraft<'_>, action: &str) -> Result<Story> {
        if !draft.project_ids.is_empty() && draft.milestone_id.is_none() {
            return Err(DbError::Validation(
                "A milestone is required to open tasks for a new story.".to_string(),
            ));
        }
        self.transaction(|conn| {
            let created_at = now();
            diesel::insert_into(stories::table)
                .values(&NewStory {
                    title: draft.title,
                    description: draft.description,
                    creator_id: draft.creator_id,
                    is_bug: draft.is_bug,
                    priority: 0,
                    created_at: &created_at,
                })
                .execute(conn)?;
            let story_id = last_insert_id(conn)?;

            if let Some(milestone_id) = draft.milestone_id {
                let rows: Vec<NewTaskRow<'_>> = draft
                    .project_ids
                    .iter()
                    .map(|&project_id| NewTaskRow {
                        story_id,
                        title: "",
                        project_id,
                        milestone_id,
                        status: TaskStatus::default().code(),
                        assignee_id: None,
                    })
                    .collect();
                if !rows.is_empty() {
                    diesel::insert_into(tasks::table).values(&rows).execute(conn)?;
                }
            }

            insert_tags(conn, story_id, draft.tags)?;

            insert_comment(
                conn,
                &CommentDraft {
                    story_id,
                    author_id: draft.creator_id,
                    comment_type: CommentType::StoryCreated,
                    action: Some(action),
                    content: "",
                },
            )?;

            Ok(stories::table.find(story_id).first::<Story>(conn)?)
        })
    }

    pub fn set_story_priority(&self, story_id: i32, priority: i32, comment: &CommentDraft<'_>) -> Result<()> {
        self.transaction(|conn| {
            diesel::update(stories::table.find(story_id))
                .set(stories::priority.eq(priority))
                .execute(conn)?;
            insert_comment(conn, comment)?;
            Ok(())
        })
    }

    /// Save edited text fields; `tags`, when given, replaces the whole tag set.
    pub fn update_story(
        &self,
        story_id: i32,
        title: &str,
        description: &str,
        tags: Option<&BTreeSet<String>>,
        comment: &CommentDraft<'_>,
    ) -> Result<()> {
        self.transaction(|conn| {
            diesel::update(stories::table.find(story_id))
                .set((stories::title.eq(title), stories::description.eq(description)))
                .execute(conn)?;
            if let Some(tags) = tags {
                diesel::delete(story_tags::table.filter(story_tags::story_id.eq(story_id)))
                    .execute(conn)?;
                insert_tags(conn, story_id, tags)?;
            }
            insert_comment(conn, comment)?;
            Ok(())
        })
    }

    pub fn story_tags(&self, story_id: i32) -> Result<BTreeSet<String>> {
        let mut conn = self.get_conn()?;
        let names = story_tags::table
            .filter(story_tags::story_id.eq(story_id))
            .select(story_tags::name)
            .load::<String>(&mut conn)?;
        Ok(names.into_iter().collect())
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn get_task(&self, task_id: i32) -> Result<Option<TaskDetail>> {
        let mut conn = self.get_conn()?;
        let row = tasks::table
            .inner_join(projects::table)
            .inner_join(milestones::table.inner_join(branches::table))
            .filter(tasks::id.eq(task_id))
            .select((
                tasks::all_columns,
                projects::all_columns,
                milestones::all_columns,
                branches::all_columns,
            ))
            .first::<(Task, Project, Milestone, Branch)>(&mut conn)
            .optional()?;

        let Some((task, project, milestone, branch)) = row else {
            return Ok(None);
        };
        let assignee = match task.assignee_id {
            Some(id) => users::table.find(id).first::<User>(&mut conn).optional()?,
            None => None,
        };
        Ok(Some(TaskDetail::new(task, project, milestone, branch, assignee)))
    }

    pub fn story_tasks(&self, story_id: i32) -> Result<Vec<TaskDetail>> {
        let mut conn = self.get_conn()?;
        let rows = tasks::table
            .inner_join(projects::table)
            .inner_join(milestones::table.inner_join(branches::table))
            .filter(tasks::story_id.eq(story_id))
            .order(tasks::id.asc())
            .select((
                tasks::all_columns,
                projects::all_columns,
                milestones::all_columns,
                branches::all_columns,
            ))
            .load::<(Task, Project, Milestone, Branch)>(&mut conn)?;

        let task_rows: Vec<Task> = rows.iter().map(|(t, _, _, _)| t.clone()).collect();
        let assignees = load_assignees(&mut conn, &task_rows)?;

        Ok(rows
            .into_iter()
            .map(|(task, project, milestone, branch)| {
                let assignee = task
                    .assignee_id
                    .and_then(|id| assignees.get(&id).cloned());
                TaskDetail::new(task, project, milestone, branch, assignee)
            })
            .collect())
    }

    /// Add a task and its audit comment. Returns the new task id.
    pub fn add_task(&self, task: &NewTask<'_>, comment: &CommentDraft<'_>) -> Result<i32> {
        self.transaction(|conn| {
            diesel::insert_into(tasks::table)
                .values(&NewTaskRow {
                    story_id: task.story_id,
                    title: task.title,
                    project_id: task.project_id,
                    milestone_id: task.milestone_id,
                    status: TaskStatus::default().code(),
                    assignee_id: None,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;
            insert_comment(conn, comment)?;
            Ok(id)
        })
    }

    pub fn update_task(&self, task_id: i32, update: &TaskUpdate<'_>, comment: &CommentDraft<'_>) -> Result<()> {
        self.transaction(|conn| {
            diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::title.eq(update.title),
                    tasks::milestone_id.eq(update.milestone_id),
                    tasks::status.eq(update.status.code()),
                    tasks::assignee_id.eq(update.assignee_id),
                ))
                .execute(conn)?;
            insert_comment(conn, comment)?;
            Ok(())
        })
    }

    pub fn delete_task(&self, task_id: i32, comment: &CommentDraft<'_>) -> Result<()> {
        self.transaction(|conn| {
            diesel::delete(tasks::table.find(task_id)).execute(conn)?;
            insert_comment(conn, comment)?;
            Ok(())
        })
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub fn add_comment(&self, comment: &CommentDraft<'_>) -> Result<i32> {
        let mut conn = self.get_conn()?;
        insert_comment(&mut conn, comment)
    }

    /// A story's history, oldest first
    pub fn story_comments(&self, story_id: i32) -> Result<Vec<CommentDetail>> {
        let mut conn = self.get_conn()?;
        let rows = comments::table
            .inner_join(users::table)
            .filter(comments::story_id.eq(story_id))
            .order(comments::id.asc())
            .select((comments::all_columns, users::all_columns))
            .load::<(Comment, User)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(comment, author)| CommentDetail { comment, author })
            .collect())
    }
}
