//! Audit messages for story and task changes
//!
//! Every mutation leaves a comment on its story whose `action` text says what
//! happened. This module builds those texts: it diffs the current and the
//! submitted field values into an ordered list of changes and formats them.

use crate::model::{Priority, TaskStatus};
use std::collections::BTreeSet;

/// Ordered list of human-readable changes, e.g. `["title", "status -> Review"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actions(Vec<String>);

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: impl Into<String>) {
        self.0.push(action.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}

/// Display name of a task: `project/branch`, plus the quoted title if any.
pub fn task_name(project: &str, branch_short_name: &str, title: &str) -> String {
    if title.is_empty() {
        format!("{}/{}", project, branch_short_name)
    } else {
        format!("{}/{} \"{}\"", project, branch_short_name, title)
    }
}

/// Task fields an edit can touch, with the names needed for messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields<'a> {
    pub title: &'a str,
    pub milestone_id: i32,
    pub milestone_name: &'a str,
    pub status: &'a str,
    pub assignee: Option<&'a str>,
}

/// Changes between the stored task and the submitted one, in the order
/// title, milestone, status, assignee.
pub fn diff_task(current: &TaskFields<'_>, proposed: &TaskFields<'_>) -> Actions {
    let mut actions = Actions::new();
    if current.title != proposed.title {
        actions.record("title");
    }
    if current.milestone_id != proposed.milestone_id {
        actions.record(format!("milestone -> {}", proposed.milestone_name));
    }
    if current.status != proposed.status {
        actions.record(format!("status -> {}", TaskStatus::display(proposed.status)));
    }
    if current.assignee != proposed.assignee {
        actions.record(format!("assignee -> {}", proposed.assignee.unwrap_or("None")));
    }
    actions
}

/// Story fields an edit can touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryFields<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a BTreeSet<String>,
}

/// Result of diffing a story edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDiff {
    pub actions: Actions,
    pub tags_changed: bool,
    pub only_tags: bool,
}

pub fn diff_story(current: &StoryFields<'_>, proposed: &StoryFields<'_>) -> StoryDiff {
    let mut actions = Actions::new();
    let mut only_tags = true;
    if current.title != proposed.title {
        only_tags = false;
        actions.record("title");
    }
    if current.description != proposed.description {
        only_tags = false;
        actions.record("description");
    }
    let tags_changed = current.tags != proposed.tags;
    if tags_changed {
        actions.record("tags");
    }
    StoryDiff {
        actions,
        tags_changed,
        only_tags,
    }
}

pub fn story_created(title: &str) -> String {
    format!("Story created ({})", title)
}

pub fn story_updated(actions: &Actions) -> String {
    format!("Updated story {}", actions.joined())
}

pub fn priority_set(old: i32, new: i32) -> String {
    format!(
        "Set priority: {} -> {}",
        Priority::display(old),
        Priority::display(new)
    )
}

pub fn task_added(name: &str) -> String {
    format!("Added {} task", name)
}

pub fn task_updated(name: &str, actions: &Actions) -> String {
    format!("Updated {} task {}", name, actions.joined())
}

pub fn task_deleted(name: &str) -> String {
    format!("Deleted {} task", name)
}
