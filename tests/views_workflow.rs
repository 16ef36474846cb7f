//! End-to-end tests for the request handlers
//!
//! Each test opens a fresh SQLite database in a temporary directory and drives
//! the handlers the way the HTTP layer does, then inspects the stored rows and
//! the audit trail.

use storyboard::{
    BranchStatus, Database, Form, Outcome, Templates, User, ViewError, Views,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    views: Views,
    alice: User,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::open_at(dir.path().join("storyboard.db")).expect("open db");
    db.seed_defaults().expect("seed");
    db.create_project("nova", "Compute").expect("project");
    db.create_project("swift", "Object storage").expect("project");
    let alice = db.create_user("alice").expect("user");
    db.create_user("bob").expect("user");
    let views = Views::new(db, Templates::new().expect("templates"), 5);
    Fixture {
        _dir: dir,
        views,
        alice,
    }
}

fn form(pairs: &[(&str, &str)]) -> Form {
    pairs.iter().copied().collect()
}

fn redirect_target(outcome: Outcome) -> String {
    match outcome {
        Outcome::Redirect(location) => location,
        Outcome::Page(_) => panic!("expected a redirect"),
    }
}

fn new_story(f: &Fixture, title: &str, story_type: &str, projects: &str, tags: &str) -> i32 {
    let location = redirect_target(
        f.views
            .add_story(
                &f.alice,
                &form(&[
                    ("title", title),
                    ("description", "Steps to reproduce"),
                    ("story_type", story_type),
                    ("projects", projects),
                    ("tags", tags),
                ]),
            )
            .expect("add story"),
    );
    location
        .strip_prefix("/story/")
        .and_then(|id| id.parse().ok())
        .expect("redirect to new story")
}

fn actions(f: &Fixture, story_id: i32) -> Vec<(String, Option<String>)> {
    f.views
        .db()
        .story_comments(story_id)
        .expect("comments")
        .into_iter()
        .map(|c| (c.comment.comment_type, c.comment.action))
        .collect()
}

fn last_action(f: &Fixture, story_id: i32) -> (String, Option<String>) {
    actions(f, story_id).pop().expect("at least one comment")
}

// =============================================================================
// Story creation
// =============================================================================

#[test]
fn test_add_story_creates_tasks_tags_and_comment() {
    let f = fixture();
    let id = new_story(&f, "Crash on boot", "1", "nova swift", "ui ui boot");

    let story = f.views.db().get_story(id).unwrap().unwrap();
    assert!(story.is_bug);
    assert_eq!(story.priority, 0);
    assert_eq!(story.creator_id, f.alice.id);

    let tags: Vec<String> = f.views.db().story_tags(id).unwrap().into_iter().collect();
    assert_eq!(tags, vec!["boot", "ui"]);

    let tasks = f.views.db().story_tasks(id).unwrap();
    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["nova/master", "swift/master"]);
    assert!(tasks.iter().all(|t| t.milestone.undefined));

    assert_eq!(
        actions(&f, id),
        vec![("star-empty".to_string(), Some("Story created (Crash on boot)".to_string()))]
    );
}

#[test]
fn test_add_story_empty_type_is_feature() {
    let f = fixture();
    let id = new_story(&f, "Dark mode", "", "", "");
    let story = f.views.db().get_story(id).unwrap().unwrap();
    assert!(!story.is_bug);
    assert!(f.views.db().story_tasks(id).unwrap().is_empty());
}

#[test]
fn test_add_story_missing_field_creates_nothing() {
    let f = fixture();
    let outcome = f
        .views
        .add_story(&f.alice, &form(&[("title", "Half a form"), ("description", "")]))
        .unwrap();
    assert_eq!(outcome, Outcome::Redirect("/".to_string()));
    assert!(f.views.db().recent_stories(true, 5).unwrap().is_empty());
    assert!(f.views.db().recent_stories(false, 5).unwrap().is_empty());
}

#[test]
fn test_add_story_unknown_project_is_not_found() {
    let f = fixture();
    let result = f.views.add_story(
        &f.alice,
        &form(&[
            ("title", "t"),
            ("description", "d"),
            ("story_type", "1"),
            ("projects", "nova glance"),
            ("tags", ""),
        ]),
    );
    assert!(matches!(result, Err(ViewError::NotFound(ref what)) if what.contains("glance")));
    assert!(f.views.db().recent_stories(true, 5).unwrap().is_empty());
}

// =============================================================================
// Pages
// =============================================================================

#[test]
fn test_dashboard_shows_recent_stories() {
    let f = fixture();
    new_story(&f, "Crash on boot", "1", "", "");
    new_story(&f, "Dark mode", "", "", "");

    let Outcome::Page(html) = f.views.dashboard().unwrap() else {
        panic!("dashboard should render a page");
    };
    assert!(html.contains("Crash on boot"));
    assert!(html.contains("Dark mode"));
}

#[test]
fn test_dashboard_limits_recent_stories() {
    let f = fixture();
    for i in 0..7 {
        new_story(&f, &format!("bug number {}", i), "1", "", "");
    }
    let Outcome::Page(html) = f.views.dashboard().unwrap() else {
        panic!("dashboard should render a page");
    };
    assert!(html.contains("bug number 6"));
    assert!(html.contains("bug number 2"));
    assert!(!html.contains("bug number 1"));
}

#[test]
fn test_story_page_contents() {
    let f = fixture();
    let id = new_story(&f, "Crash <on> boot", "1", "nova", "ui");
    let page = f.views.story_page(id).unwrap();
    assert_eq!(page.priority_label, "Undefined");
    assert_eq!(page.tags, vec!["ui"]);
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.comments.len(), 1);
    assert_eq!(page.priorities.len(), 5);
    assert_eq!(page.taskstatuses.len(), 3);
    assert!(page.milestones.iter().any(|m| m.milestone.undefined));

    let Outcome::Page(html) = f.views.view(id).unwrap() else {
        panic!("story view should render a page");
    };
    assert!(html.contains("Crash &lt;on&gt; boot"));
    assert!(html.contains("Story created"));
}

#[test]
fn test_view_unknown_story_is_not_found() {
    let f = fixture();
    assert!(matches!(f.views.view(404), Err(ViewError::NotFound(_))));
}

// =============================================================================
// Comments and priority
// =============================================================================

#[test]
fn test_comment_added_only_with_content() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");

    f.views.comment(&f.alice, id, &form(&[("content", "")])).unwrap();
    f.views.comment(&f.alice, id, &form(&[])).unwrap();
    assert_eq!(actions(&f, id).len(), 1);

    let outcome = f
        .views
        .comment(&f.alice, id, &form(&[("content", "Confirmed on trunk")]))
        .unwrap();
    assert_eq!(outcome, Outcome::Redirect(format!("/story/{}", id)));

    let comments = f.views.db().story_comments(id).unwrap();
    let last = comments.last().unwrap();
    assert_eq!(last.comment.comment_type, "comment");
    assert_eq!(last.comment.content, "Confirmed on trunk");
    assert_eq!(last.comment.action, None);
    assert_eq!(last.author.username, "alice");
}

#[test]
fn test_set_priority_records_change() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");

    f.views
        .set_priority(&f.alice, id, &form(&[("priority", "3"), ("comment", "Blocks release")]))
        .unwrap();

    assert_eq!(f.views.db().get_story(id).unwrap().unwrap().priority, 3);
    let comments = f.views.db().story_comments(id).unwrap();
    let last = comments.last().unwrap();
    assert_eq!(last.comment.comment_type, "random");
    assert_eq!(last.comment.action.as_deref(), Some("Set priority: Undefined -> High"));
    assert_eq!(last.comment.content, "Blocks release");
}

#[test]
fn test_set_same_priority_is_silent() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");
    f.views.set_priority(&f.alice, id, &form(&[("priority", "0")])).unwrap();
    f.views.set_priority(&f.alice, id, &form(&[])).unwrap();
    assert_eq!(actions(&f, id).len(), 1);
}

#[test]
fn test_set_priority_rejects_bad_values() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");
    assert!(matches!(
        f.views.set_priority(&f.alice, id, &form(&[("priority", "urgent")])),
        Err(ViewError::BadRequest(_))
    ));
    assert!(matches!(
        f.views.set_priority(&f.alice, id, &form(&[("priority", "17")])),
        Err(ViewError::BadRequest(_))
    ));
    assert_eq!(f.views.db().get_story(id).unwrap().unwrap().priority, 0);
}

// =============================================================================
// Tasks
// =============================================================================

#[test]
fn test_add_task_defaults_to_master_undefined_milestone() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");

    f.views
        .add_task(
            &f.alice,
            id,
            &form(&[("project", "nova"), ("title", "backend"), ("milestone", ""), ("comment", "on it")]),
        )
        .unwrap();

    let tasks = f.views.db().story_tasks(id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].milestone.undefined);
    assert_eq!(tasks[0].task.status, "T");
    assert_eq!(
        last_action(&f, id),
        ("plus-sign".to_string(), Some("Added nova/master \"backend\" task".to_string()))
    );
}

#[test]
fn test_add_task_ignores_milestone_off_master() {
    let f = fixture();
    let db = f.views.db();
    let stable = db
        .create_branch("stable/havana", "havana", BranchStatus::Frozen, Some("2013-10-17"))
        .unwrap();
    let rc = db.create_milestone("havana-rc1", stable.id, false, false).unwrap();
    let id = new_story(&f, "t", "1", "", "");

    f.views
        .add_task(
            &f.alice,
            id,
            &form(&[("project", "swift"), ("title", ""), ("milestone", &rc.id.to_string())]),
        )
        .unwrap();

    let tasks = db.story_tasks(id).unwrap();
    assert_eq!(tasks[0].branch.short_name, "master");
    assert!(tasks[0].milestone.undefined);
}

#[test]
fn test_add_task_uses_requested_master_milestone() {
    let f = fixture();
    let db = f.views.db();
    let (_, master) = db.master_undefined_milestone().unwrap().unwrap();
    let m1 = db.create_milestone("icehouse-1", master.id, false, false).unwrap();
    let id = new_story(&f, "t", "1", "", "");

    f.views
        .add_task(
            &f.alice,
            id,
            &form(&[("project", "nova"), ("title", ""), ("milestone", &m1.id.to_string())]),
        )
        .unwrap();

    assert_eq!(db.story_tasks(id).unwrap()[0].milestone.name, "icehouse-1");
}

#[test]
fn test_task_on_released_milestone_keeps_its_milestone() {
    let f = fixture();
    let db = f.views.db();
    let (_, master) = db.master_undefined_milestone().unwrap().unwrap();
    let shipped = db.create_milestone("icehouse-1", master.id, true, false).unwrap();
    let id = new_story(&f, "t", "1", "", "");
    f.views
        .add_task(
            &f.alice,
            id,
            &form(&[("project", "nova"), ("title", ""), ("milestone", &shipped.id.to_string())]),
        )
        .unwrap();
    let task = db.story_tasks(id).unwrap().remove(0);
    assert_eq!(task.milestone.name, "icehouse-1");

    let Outcome::Page(html) = f.views.view(id).unwrap() else {
        panic!("story view should render a page");
    };
    let selected = format!("<option value=\"{}\" selected>master / icehouse-1</option>", shipped.id);
    assert!(html.contains(&selected), "released milestone should stay selected");

    // Submitting the edit form unchanged apart from a comment moves nothing
    let milestone_id = shipped.id.to_string();
    f.views
        .edit_task(
            &f.alice,
            task.task.id,
            &form(&[
                ("title", ""),
                ("milestone", &milestone_id),
                ("status", "T"),
                ("assignee", ""),
                ("comment", "still shipped"),
            ]),
        )
        .unwrap();
    let after = db.get_task(task.task.id).unwrap().unwrap();
    assert_eq!(after.milestone.id, shipped.id);
    assert!(actions(&f, id)
        .iter()
        .all(|(_, action)| !action.as_deref().unwrap_or("").contains("milestone ->")));
}

#[test]
fn test_add_task_empty_project_or_missing_field_does_nothing() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "");

    f.views
        .add_task(&f.alice, id, &form(&[("project", ""), ("title", "x"), ("milestone", "")]))
        .unwrap();
    let outcome = f
        .views
        .add_task(&f.alice, id, &form(&[("project", "nova"), ("milestone", "")]))
        .unwrap();

    assert_eq!(outcome, Outcome::Redirect(format!("/story/{}", id)));
    assert!(f.views.db().story_tasks(id).unwrap().is_empty());
    assert_eq!(actions(&f, id).len(), 1);
}

#[test]
fn test_edit_task_records_every_change() {
    let f = fixture();
    let db = f.views.db();
    let (_, master) = db.master_undefined_milestone().unwrap().unwrap();
    let m1 = db.create_milestone("icehouse-1", master.id, false, false).unwrap();
    let id = new_story(&f, "t", "1", "nova", "");
    let task_id = db.story_tasks(id).unwrap()[0].task.id;

    let outcome = f
        .views
        .edit_task(
            &f.alice,
            task_id,
            &form(&[
                ("title", "api"),
                ("milestone", &m1.id.to_string()),
                ("status", "R"),
                ("assignee", "bob"),
                ("comment", "patch up"),
            ]),
        )
        .unwrap();
    assert_eq!(outcome, Outcome::Redirect(format!("/story/{}", id)));

    let task = db.get_task(task_id).unwrap().unwrap();
    assert_eq!(task.task.title, "api");
    assert_eq!(task.milestone.name, "icehouse-1");
    assert_eq!(task.status_label, "Review");
    assert_eq!(task.assignee.unwrap().username, "bob");

    assert_eq!(
        last_action(&f, id),
        (
            "tasks".to_string(),
            Some(
                "Updated nova/master \"api\" task title, milestone -> icehouse-1, status -> Review, assignee -> bob"
                    .to_string()
            )
        )
    );
}

#[test]
fn test_edit_task_unassign_and_no_op() {
    let f = fixture();
    let db = f.views.db();
    let id = new_story(&f, "t", "1", "nova", "");
    let detail = db.story_tasks(id).unwrap().remove(0);
    let milestone = detail.milestone.id.to_string();

    let submit = |assignee: &str| {
        f.views
            .edit_task(
                &f.alice,
                detail.task.id,
                &form(&[("title", ""), ("milestone", &milestone), ("status", "T"), ("assignee", assignee)]),
            )
            .unwrap()
    };

    submit("");
    assert_eq!(actions(&f, id).len(), 1, "unchanged task leaves no comment");

    submit("bob");
    submit("");
    assert_eq!(
        last_action(&f, id).1.as_deref(),
        Some("Updated nova/master task assignee -> None")
    );
    assert!(db.get_task(detail.task.id).unwrap().unwrap().assignee.is_none());
}

#[test]
fn test_edit_task_missing_field_saves_nothing() {
    let f = fixture();
    let db = f.views.db();
    let id = new_story(&f, "t", "1", "nova", "");
    let task_id = db.story_tasks(id).unwrap()[0].task.id;

    f.views
        .edit_task(&f.alice, task_id, &form(&[("title", "renamed"), ("status", "L")]))
        .unwrap();

    assert_eq!(db.get_task(task_id).unwrap().unwrap().task.title, "");
    assert_eq!(actions(&f, id).len(), 1);
}

#[test]
fn test_edit_task_rejects_unknown_status_and_user() {
    let f = fixture();
    let db = f.views.db();
    let id = new_story(&f, "t", "1", "nova", "");
    let detail = db.story_tasks(id).unwrap().remove(0);
    let milestone = detail.milestone.id.to_string();

    let bad_status = f.views.edit_task(
        &f.alice,
        detail.task.id,
        &form(&[("title", ""), ("milestone", &milestone), ("status", "X"), ("assignee", "")]),
    );
    assert!(matches!(bad_status, Err(ViewError::BadRequest(_))));

    let unknown_user = f.views.edit_task(
        &f.alice,
        detail.task.id,
        &form(&[("title", ""), ("milestone", &milestone), ("status", "T"), ("assignee", "mallory")]),
    );
    assert!(matches!(unknown_user, Err(ViewError::NotFound(_))));
}

#[test]
fn test_delete_task() {
    let f = fixture();
    let db = f.views.db();
    let id = new_story(&f, "t", "1", "nova swift", "");
    let task_id = db.story_tasks(id).unwrap()[1].task.id;

    let outcome = f
        .views
        .delete_task(&f.alice, task_id, &form(&[("comment", "duplicate")]))
        .unwrap();
    assert_eq!(outcome, Outcome::Redirect(format!("/story/{}", id)));

    assert_eq!(db.story_tasks(id).unwrap().len(), 1);
    let comments = db.story_comments(id).unwrap();
    let last = comments.last().unwrap();
    assert_eq!(last.comment.comment_type, "remove-sign");
    assert_eq!(last.comment.action.as_deref(), Some("Deleted swift/master task"));
    assert_eq!(last.comment.content, "duplicate");

    assert!(matches!(
        f.views.delete_task(&f.alice, task_id, &form(&[])),
        Err(ViewError::NotFound(_))
    ));
}

// =============================================================================
// Story edits
// =============================================================================

#[test]
fn test_edit_story_only_tags() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "a b");

    f.views
        .edit_story(
            &f.alice,
            id,
            &form(&[("title", "t"), ("description", "Steps to reproduce"), ("tags", "b c")]),
        )
        .unwrap();

    let tags: Vec<String> = f.views.db().story_tags(id).unwrap().into_iter().collect();
    assert_eq!(tags, vec!["b", "c"]);
    assert_eq!(
        last_action(&f, id),
        ("tags".to_string(), Some("Updated story tags".to_string()))
    );
}

#[test]
fn test_edit_story_text_fields() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "a");

    f.views
        .edit_story(
            &f.alice,
            id,
            &form(&[("title", "Better title"), ("description", "More detail"), ("tags", "a")]),
        )
        .unwrap();

    let story = f.views.db().get_story(id).unwrap().unwrap();
    assert_eq!(story.title, "Better title");
    assert_eq!(story.description, "More detail");
    assert_eq!(
        last_action(&f, id),
        ("align-left".to_string(), Some("Updated story title, description".to_string()))
    );
}

#[test]
fn test_edit_story_unchanged_or_incomplete() {
    let f = fixture();
    let id = new_story(&f, "t", "1", "", "a");

    f.views
        .edit_story(
            &f.alice,
            id,
            &form(&[("title", "t"), ("description", "Steps to reproduce"), ("tags", " a ")]),
        )
        .unwrap();
    f.views
        .edit_story(&f.alice, id, &form(&[("title", "changed"), ("description", "changed")]))
        .unwrap();

    assert_eq!(f.views.db().get_story(id).unwrap().unwrap().title, "t");
    assert_eq!(actions(&f, id).len(), 1);
}
