// Storyboard schema - story tracking tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    projects (id) {
        id -> Integer,
        name -> Text,
        title -> Text,
    }
}

diesel::table! {
    branches (id) {
        id -> Integer,
        name -> Text,
        short_name -> Text,
        status -> Text,
        release_date -> Nullable<Text>,
    }
}

diesel::table! {
    milestones (id) {
        id -> Integer,
        name -> Text,
        branch_id -> Integer,
        released -> Bool,
        undefined -> Bool,
    }
}

diesel::table! {
    stories (id) {
        id -> Integer,
        title -> Text,
        description -> Text,
        creator_id -> Integer,
        is_bug -> Bool,
        priority -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        story_id -> Integer,
        title -> Text,
        project_id -> Integer,
        milestone_id -> Integer,
        status -> Text,
        assignee_id -> Nullable<Integer>,
    }
}

diesel::table! {
    story_tags (id) {
        id -> Integer,
        story_id -> Integer,
        name -> Text,
    }
}

diesel::table! {
    comments (id) {
        id -> Integer,
        story_id -> Integer,
        action -> Nullable<Text>,
        author_id -> Integer,
        comment_type -> Text,
        content -> Text,
        posted_date -> Text,
    }
}

diesel::joinable!(milestones -> branches (branch_id));
diesel::joinable!(stories -> users (creator_id));
diesel::joinable!(tasks -> stories (story_id));
diesel::joinable!(tasks -> projects (project_id));
diesel::joinable!(tasks -> milestones (milestone_id));
diesel::joinable!(story_tags -> stories (story_id));
diesel::joinable!(comments -> stories (story_id));
diesel::joinable!(comments -> users (author_id));

diesel::allow_tables_to_appear_in_same_query!(
    schema_versions,
    users,
    projects,
    branches,
    milestones,
    stories,
    tasks,
    story_tags,
    comments,
);
