//! Code tables for stories, tasks, branches and comments
//!
//! These are stored as plain integers or short text codes in the database and
//! shown to users through their labels.

use serde::Serialize;
use thiserror::Error;

/// Error returned when a stored or submitted code is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownCode {
    fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A label shown in select boxes: stored value plus human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: &'static str,
}

/// Story priority, stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Undefined,
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Undefined,
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub const fn value(self) -> i32 {
        match self {
            Priority::Undefined => 0,
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Priority::Undefined => "Undefined",
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }

    pub fn from_value(value: i32) -> Result<Self, UnknownCode> {
        Self::ALL
            .into_iter()
            .find(|p| p.value() == value)
            .ok_or_else(|| UnknownCode::new("priority", value.to_string()))
    }

    /// Label for a stored value, falling back to the raw number for values
    /// written before the code table was extended.
    pub fn display(value: i32) -> String {
        Self::from_value(value)
            .map(|p| p.label().to_string())
            .unwrap_or_else(|_| value.to_string())
    }

    pub fn choices() -> Vec<Choice> {
        Self::ALL
            .into_iter()
            .map(|p| Choice {
                value: p.value().to_string(),
                label: p.label(),
            })
            .collect()
    }
}

/// Task progress, stored as a single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    #[default]
    Todo,
    Review,
    Landed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::Review, TaskStatus::Landed];

    pub const fn code(self) -> &'static str {
        match self {
            TaskStatus::Todo => "T",
            TaskStatus::Review => "R",
            TaskStatus::Landed => "L",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::Review => "Review",
            TaskStatus::Landed => "Landed",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, UnknownCode> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| UnknownCode::new("task status", code))
    }

    pub fn display(code: &str) -> String {
        Self::from_code(code)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|_| code.to_string())
    }

    pub fn choices() -> Vec<Choice> {
        Self::ALL
            .into_iter()
            .map(|s| Choice {
                value: s.code().to_string(),
                label: s.label(),
            })
            .collect()
    }
}

/// Branch lifecycle. Only master branches accept new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchStatus {
    Master,
    Frozen,
    Released,
}

impl BranchStatus {
    pub const fn code(self) -> &'static str {
        match self {
            BranchStatus::Master => "M",
            BranchStatus::Frozen => "F",
            BranchStatus::Released => "R",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, UnknownCode> {
        match code {
            "M" => Ok(BranchStatus::Master),
            "F" => Ok(BranchStatus::Frozen),
            "R" => Ok(BranchStatus::Released),
            other => Err(UnknownCode::new("branch status", other)),
        }
    }
}

impl std::str::FromStr for BranchStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

/// Kind of comment entry. The stored value doubles as the icon name the
/// story page shows next to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentType {
    Comment,
    Priority,
    StoryCreated,
    TaskAdded,
    TaskEdited,
    TaskDeleted,
    TagsEdited,
    StoryEdited,
}

impl CommentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommentType::Comment => "comment",
            CommentType::Priority => "random",
            CommentType::StoryCreated => "star-empty",
            CommentType::TaskAdded => "plus-sign",
            CommentType::TaskEdited => "tasks",
            CommentType::TaskDeleted => "remove-sign",
            CommentType::TagsEdited => "tags",
            CommentType::StoryEdited => "align-left",
        }
    }
}
