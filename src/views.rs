//! Request handlers
//!
//! Each mutating handler validates the submitted form, writes through
//! [`Database`], leaves an audit comment on the story and answers with a
//! redirect to the story page. A required form field that is absent aborts
//! the handler without writing anything; the client is redirected all the
//! same.

use crate::audit::{self, StoryFields, TaskFields};
use crate::db::{
    Branch, CommentDetail, CommentDraft, Database, DbError, Milestone, NewTask, Story, StoryDraft,
    TaskDetail, TaskUpdate, User,
};
use crate::form::{self, Form, FormError};
use crate::model::{Choice, CommentType, Priority, TaskStatus};
use crate::templates::Templates;
use minijinja::context;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// What the HTTP layer should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Redirect(String),
    Page(String),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    /// Reference data the handler depends on is missing (e.g. no default milestone)
    #[error("{0}")]
    Setup(String),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

pub type ViewResult<T> = std::result::Result<T, ViewError>;

pub fn story_url(story_id: i32) -> String {
    format!("/story/{}", story_id)
}

/// Swallow a missing-field error so the handler still redirects.
fn ignore_missing_field(result: ViewResult<()>) -> ViewResult<()> {
    match result {
        Err(ViewError::Form(FormError::MissingField(field))) => {
            debug!(field = %field, "form submitted without required field, nothing saved");
            Ok(())
        }
        other => other,
    }
}

fn parse_id(value: &str, what: &str) -> ViewResult<i32> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| ViewError::BadRequest(format!("Invalid {} '{}'", what, value)))
}

/// A milestone as offered in the story page's select boxes.
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneChoice {
    pub milestone: Milestone,
    pub branch: Branch,
}

/// Everything the story page shows; also served as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct StoryPage {
    pub story: Story,
    pub priority_label: String,
    pub tags: Vec<String>,
    pub tasks: Vec<TaskDetail>,
    pub comments: Vec<CommentDetail>,
    pub milestones: Vec<MilestoneChoice>,
    pub priorities: Vec<Choice>,
    pub taskstatuses: Vec<Choice>,
}

pub struct Views {
    db: Database,
    templates: Templates,
    recent_limit: i64,
}

impl Views {
    pub fn new(db: Database, templates: Templates, recent_limit: i64) -> Self {
        Self {
            db,
            templates,
            recent_limit,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    fn story(&self, story_id: i32) -> ViewResult<Story> {
        self.db
            .get_story(story_id)?
            .ok_or_else(|| ViewError::NotFound(format!("Story {}", story_id)))
    }

    fn task(&self, task_id: i32) -> ViewResult<TaskDetail> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| ViewError::NotFound(format!("Task {}", task_id)))
    }

    fn default_milestone(&self) -> ViewResult<(Milestone, Branch)> {
        self.db.master_undefined_milestone()?.ok_or_else(|| {
            ViewError::Setup(
                "No undefined milestone on a master branch; run 'storyboard init'.".to_string(),
            )
        })
    }

    // ========================================================================
    // Pages
    // ========================================================================

    pub fn dashboard(&self) -> ViewResult<Outcome> {
        let recent_bugs = self.db.recent_stories(true, self.recent_limit)?;
        let recent_features = self.db.recent_stories(false, self.recent_limit)?;
        let html = self.templates.render(
            "dashboard.html",
            context! { recent_bugs, recent_features },
        )?;
        Ok(Outcome::Page(html))
    }

    pub fn story_page(&self, story_id: i32) -> ViewResult<StoryPage> {
        let story = self.story(story_id)?;
        let milestones = self
            .db
            .unreleased_milestones()?
            .into_iter()
            .map(|(milestone, branch)| MilestoneChoice { milestone, branch })
            .collect();
        Ok(StoryPage {
            priority_label: Priority::display(story.priority),
            tags: self.db.story_tags(story_id)?.into_iter().collect(),
            tasks: self.db.story_tasks(story_id)?,
            comments: self.db.story_comments(story_id)?,
            milestones,
            priorities: Priority::choices(),
            taskstatuses: TaskStatus::choices(),
            story,
        })
    }

    pub fn view(&self, story_id: i32) -> ViewResult<Outcome> {
        let page = self.story_page(story_id)?;
        Ok(Outcome::Page(self.templates.render("story.html", &page)?))
    }

    // ========================================================================
    // Story mutations
    // ========================================================================

    pub fn comment(&self, user: &User, story_id: i32, form: &Form) -> ViewResult<Outcome> {
        let story = self.story(story_id)?;
        if let Some(content) = form.filled("content") {
            self.db.add_comment(&CommentDraft {
                story_id: story.id,
                author_id: user.id,
                comment_type: CommentType::Comment,
                action: None,
                content,
            })?;
            info!(story = story.id, user = %user.username, "comment added");
        }
        Ok(Outcome::Redirect(story_url(story.id)))
    }

    pub fn set_priority(&self, user: &User, story_id: i32, form: &Form) -> ViewResult<Outcome> {
        let story = self.story(story_id)?;
        if let Some(raw) = form.filled("priority") {
            let value = parse_id(raw, "priority")?;
            let priority = Priority::from_value(value)
                .map_err(|e| ViewError::BadRequest(e.to_string()))?;
            if priority.value() != story.priority {
                let action = audit::priority_set(story.priority, priority.value());
                self.db.set_story_priority(
                    story.id,
                    priority.value(),
                    &CommentDraft {
                        story_id: story.id,
                        author_id: user.id,
                        comment_type: CommentType::Priority,
                        action: Some(&action),
                        content: form.field_or("comment", ""),
                    },
                )?;
                info!(story = story.id, user = %user.username, "{}", action);
            }
        }
        Ok(Outcome::Redirect(story_url(story.id)))
    }

    /// Create a story. Redirects to the new story, or to the dashboard when
    /// the form was incomplete.
    pub fn add_story(&self, user: &User, form: &Form) -> ViewResult<Outcome> {
        match self.create_story(user, form) {
            Ok(story) => Ok(Outcome::Redirect(story_url(story.id))),
            Err(ViewError::Form(FormError::MissingField(field))) => {
                debug!(field = %field, "story form incomplete, nothing created");
                Ok(Outcome::Redirect("/".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn create_story(&self, user: &User, form: &Form) -> ViewResult<Story> {
        let title = form.field("title")?;
        let description = form.field("description")?;
        let is_bug = !form.field("story_type")?.is_empty();
        let project_names = form::words(form.field("projects")?);
        let tags = form::word_set(form.field("tags")?);

        let mut project_ids = Vec::with_capacity(project_names.len());
        for name in &project_names {
            let project = self
                .db
                .find_project(name)?
                .ok_or_else(|| ViewError::NotFound(format!("Project '{}'", name)))?;
            project_ids.push(project.id);
        }
        let milestone_id = if project_ids.is_empty() {
            None
        } else {
            Some(self.default_milestone()?.0.id)
        };

        let story = self.db.create_story(
            &StoryDraft {
                title,
                description,
                creator_id: user.id,
                is_bug,
                project_ids: &project_ids,
                milestone_id,
                tags: &tags,
            },
            &audit::story_created(title),
        )?;
        info!(story = story.id, user = %user.username, tasks = project_ids.len(), "story created");
        Ok(story)
    }

    pub fn edit_story(&self, user: &User, story_id: i32, form: &Form) -> ViewResult<Outcome> {
        let story = self.story(story_id)?;
        ignore_missing_field(self.save_story_edit(user, &story, form))?;
        Ok(Outcome::Redirect(story_url(story.id)))
    }

    fn save_story_edit(&self, user: &User, story: &Story, form: &Form) -> ViewResult<()> {
        let current_tags = self.db.story_tags(story.id)?;
        let proposed_tags = form::word_set(form.field("tags")?);
        let proposed = StoryFields {
            title: form.field("title")?,
            description: form.field("description")?,
            tags: &proposed_tags,
        };
        let current = StoryFields {
            title: &story.title,
            description: &story.description,
            tags: &current_tags,
        };

        let diff = audit::diff_story(&current, &proposed);
        if diff.actions.is_empty() {
            return Ok(());
        }
        let comment_type = if diff.only_tags {
            CommentType::TagsEdited
        } else {
            CommentType::StoryEdited
        };
        let action = audit::story_updated(&diff.actions);
        self.db.update_story(
            story.id,
            proposed.title,
            proposed.description,
            diff.tags_changed.then_some(&proposed_tags),
            &CommentDraft {
                story_id: story.id,
                author_id: user.id,
                comment_type,
                action: Some(&action),
                content: "",
            },
        )?;
        info!(story = story.id, user = %user.username, "{}", action);
        Ok(())
    }

    // ========================================================================
    // Task mutations
    // ========================================================================

    pub fn add_task(&self, user: &User, story_id: i32, form: &Form) -> ViewResult<Outcome> {
        let story = self.story(story_id)?;
        ignore_missing_field(self.create_task(user, &story, form))?;
        Ok(Outcome::Redirect(story_url(story.id)))
    }

    fn create_task(&self, user: &User, story: &Story, form: &Form) -> ViewResult<()> {
        let project_name = form.field("project")?;
        if project_name.is_empty() {
            return Ok(());
        }

        let requested = match form.field("milestone")? {
            "" => None,
            raw => {
                let id = parse_id(raw, "milestone")?;
                Some(
                    self.db
                        .get_milestone(id)?
                        .ok_or_else(|| ViewError::NotFound(format!("Milestone {}", id)))?,
                )
            }
        };
        // Tasks only target master; anything else falls back to the default
        let (milestone, branch) = match requested {
            Some((milestone, branch)) if branch.is_master() => (milestone, branch),
            _ => self.default_milestone()?,
        };

        let title = form.field("title")?;
        let project = self
            .db
            .find_project(project_name)?
            .ok_or_else(|| ViewError::NotFound(format!("Project '{}'", project_name)))?;

        let action = audit::task_added(&audit::task_name(&project.name, &branch.short_name, title));
        let task_id = self.db.add_task(
            &NewTask {
                story_id: story.id,
                title,
                project_id: project.id,
                milestone_id: milestone.id,
            },
            &CommentDraft {
                story_id: story.id,
                author_id: user.id,
                comment_type: CommentType::TaskAdded,
                action: Some(&action),
                content: form.field_or("comment", ""),
            },
        )?;
        info!(story = story.id, task = task_id, user = %user.username, "{}", action);
        Ok(())
    }

    pub fn edit_task(&self, user: &User, task_id: i32, form: &Form) -> ViewResult<Outcome> {
        let detail = self.task(task_id)?;
        ignore_missing_field(self.save_task_edit(user, &detail, form))?;
        Ok(Outcome::Redirect(story_url(detail.task.story_id)))
    }

    fn save_task_edit(&self, user: &User, detail: &TaskDetail, form: &Form) -> ViewResult<()> {
        let title = form.field("title")?;

        let milestone_id = parse_id(form.field("milestone")?, "milestone")?;
        let (milestone, branch) = self
            .db
            .get_milestone(milestone_id)?
            .ok_or_else(|| ViewError::NotFound(format!("Milestone {}", milestone_id)))?;

        let status = TaskStatus::from_code(form.field("status")?)
            .map_err(|e| ViewError::BadRequest(e.to_string()))?;

        let assignee = match form.field("assignee")? {
            "" => None,
            username => Some(
                self.db
                    .find_user(username)?
                    .ok_or_else(|| ViewError::NotFound(format!("User '{}'", username)))?,
            ),
        };

        let current = TaskFields {
            title: &detail.task.title,
            milestone_id: detail.milestone.id,
            milestone_name: &detail.milestone.name,
            status: &detail.task.status,
            assignee: detail.assignee.as_ref().map(|u| u.username.as_str()),
        };
        let proposed = TaskFields {
            title,
            milestone_id: milestone.id,
            milestone_name: &milestone.name,
            status: status.code(),
            assignee: assignee.as_ref().map(|u| u.username.as_str()),
        };

        let actions = audit::diff_task(&current, &proposed);
        if actions.is_empty() {
            return Ok(());
        }
        let name = audit::task_name(&detail.project.name, &branch.short_name, title);
        let action = audit::task_updated(&name, &actions);
        self.db.update_task(
            detail.task.id,
            &TaskUpdate {
                title,
                milestone_id: milestone.id,
                status,
                assignee_id: assignee.as_ref().map(|u| u.id),
            },
            &CommentDraft {
                story_id: detail.task.story_id,
                author_id: user.id,
                comment_type: CommentType::TaskEdited,
                action: Some(&action),
                content: form.field_or("comment", ""),
            },
        )?;
        info!(story = detail.task.story_id, task = detail.task.id, user = %user.username, "{}", action);
        Ok(())
    }

    pub fn delete_task(&self, user: &User, task_id: i32, form: &Form) -> ViewResult<Outcome> {
        let detail = self.task(task_id)?;
        let action = audit::task_deleted(&detail.name);
        self.db.delete_task(
            detail.task.id,
            &CommentDraft {
                story_id: detail.task.story_id,
                author_id: user.id,
                comment_type: CommentType::TaskDeleted,
                action: Some(&action),
                content: form.field_or("comment", ""),
            },
        )?;
        info!(story = detail.task.story_id, task = detail.task.id, user = %user.username, "{}", action);
        Ok(Outcome::Redirect(story_url(detail.task.story_id)))
    }
}
