//! Storyboard - story tracking for bugs and feature requests
//!
//! Stories are broken into tasks, each scoped to a project and a milestone.
//! Every change to a story or its tasks leaves an audit comment on the story,
//! so the story page doubles as its history.
//!
//! # Layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`views`] | Request handlers: validate, persist, audit, redirect |
//! | [`audit`] | Field diffing and audit message formatting |
//! | [`db`] | SQLite persistence through Diesel |
//! | [`serve`] | HTTP routing and responses |
//! | [`templates`] | Embedded HTML templates |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use storyboard::{Database, StoryDraft};
//!
//! let db = Database::open_at("storyboard.db").unwrap();
//! db.seed_defaults().unwrap();
//! let alice = db.create_user("alice").unwrap();
//!
//! let story = db.create_story(
//!     &StoryDraft {
//!         title: "Crash on boot",
//!         description: "Segfault right after the splash screen",
//!         creator_id: alice.id,
//!         is_bug: true,
//!         project_ids: &[],
//!         milestone_id: None,
//!         tags: &BTreeSet::new(),
//!     },
//!     "Story created (Crash on boot)",
//! ).unwrap();
//! println!("Created story #{}", story.id);
//! ```

pub mod audit;
pub mod config;
pub mod db;
pub mod form;
pub mod model;
pub mod schema;
pub mod serve;
pub mod templates;
pub mod views;

pub use config::Config;
pub use db::{
    Branch, Comment, CommentDetail, CommentDraft, Database, DbError, Milestone, NewTask, Project,
    Story, StoryDraft, Task, TaskDetail, TaskUpdate, User, CURRENT_SCHEMA,
};
pub use form::{Form, FormError};
pub use model::{BranchStatus, CommentType, Priority, TaskStatus};
pub use serve::App;
pub use templates::Templates;
pub use views::{Outcome, StoryPage, ViewError, Views};
