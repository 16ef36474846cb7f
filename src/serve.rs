//! HTTP server for the story tracker
//!
//! `storyboard serve` → listens, routes each request to a handler in
//! [`crate::views`] and turns the outcome into a response.

use crate::config::Config;
use crate::db::{Database, DbError, User};
use crate::form::Form;
use crate::templates::Templates;
use crate::views::{Outcome, ViewError, ViewResult, Views};
use minijinja::context;
use serde::Serialize;
use std::io::{Cursor, Read};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{info, warn};

type HttpResponse = Response<Cursor<Vec<u8>>>;

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Every URL the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    Story(i32),
    StoryApi(i32),
    AddStory,
    Comment(i32),
    SetPriority(i32),
    AddTask(i32),
    EditStory(i32),
    EditTask(i32),
    DeleteTask(i32),
}

impl Route {
    /// Match a request path; a trailing slash is ignored.
    pub fn parse(path: &str) -> Option<Route> {
        let trimmed = path.trim_matches('/');
        let segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        let id = |s: &str| s.parse::<i32>().ok();

        match segments.as_slice() {
            [] => Some(Route::Dashboard),
            ["story", "new"] => Some(Route::AddStory),
            ["story", story] => id(story).map(Route::Story),
            ["story", story, "comment"] => id(story).map(Route::Comment),
            ["story", story, "priority"] => id(story).map(Route::SetPriority),
            ["story", story, "addtask"] => id(story).map(Route::AddTask),
            ["story", story, "edit"] => id(story).map(Route::EditStory),
            ["task", task, "edit"] => id(task).map(Route::EditTask),
            ["task", task, "delete"] => id(task).map(Route::DeleteTask),
            ["api", "story", story] => id(story).map(Route::StoryApi),
            _ => None,
        }
    }

    /// Mutations are POST-only and need a logged-in user.
    pub fn is_mutation(self) -> bool {
        !matches!(self, Route::Dashboard | Route::Story(_) | Route::StoryApi(_))
    }

    fn method(self) -> Method {
        if self.is_mutation() {
            Method::Post
        } else {
            Method::Get
        }
    }
}

/// HTTP status for a failed handler.
pub fn status_for(error: &ViewError) -> u16 {
    match error {
        ViewError::NotFound(_) => 404,
        ViewError::BadRequest(_) | ViewError::Form(_) => 400,
        ViewError::Setup(_) | ViewError::Db(_) | ViewError::Template(_) => 500,
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

/// Login URL carrying the page to come back to.
pub fn login_redirect(login_url: &str, next: &str) -> String {
    let query = serde_urlencoded::to_string(&[("next", next)]).unwrap_or_default();
    let separator = if login_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", login_url, separator, query)
}

fn with_header<R: Read>(response: Response<R>, name: &str, value: &str) -> Response<R> {
    match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => {
            warn!(header = name, "dropping unrepresentable header value");
            response
        }
    }
}

fn html_response(status: u16, body: String) -> HttpResponse {
    with_header(
        Response::from_string(body).with_status_code(status),
        "Content-Type",
        "text/html; charset=utf-8",
    )
}

fn json_response<T: Serialize>(status: u16, body: &ApiResponse<T>) -> HttpResponse {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        format!("{{\"ok\":false,\"data\":null,\"error\":\"{}\"}}", e)
    });
    with_header(
        Response::from_string(json).with_status_code(status),
        "Content-Type",
        "application/json",
    )
}

fn redirect_response(location: &str) -> HttpResponse {
    with_header(
        Response::from_string(String::new()).with_status_code(302),
        "Location",
        location,
    )
}

/// Shared state of the running server.
pub struct App {
    views: Views,
    config: Config,
}

impl App {
    pub fn new(db: Database, templates: Templates, config: Config) -> Self {
        let views = Views::new(db, templates, config.dashboard.recent_limit);
        Self { views, config }
    }

    fn error_page(&self, status: u16, message: &str) -> HttpResponse {
        let rendered = self.views.templates().render(
            "error.html",
            context! { status, reason => reason_phrase(status), message },
        );
        match rendered {
            Ok(html) => html_response(status, html),
            Err(e) => {
                warn!("error page failed to render: {}", e);
                Response::from_string(format!("{} {}", status, reason_phrase(status)))
                    .with_status_code(status)
            }
        }
    }

    fn view_error(&self, error: &ViewError) -> HttpResponse {
        let status = status_for(error);
        if status >= 500 {
            warn!("request failed: {}", error);
        }
        self.error_page(status, &error.to_string())
    }

    /// The user named by the proxy's header, created on first sight when
    /// configured to.
    fn authenticate(&self, request: &Request) -> Result<Option<User>, DbError> {
        let auth = &self.config.auth;
        let username = request
            .headers()
            .iter()
            .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(&auth.user_header))
            .map(|h| h.value.as_str().trim().to_string())
            .filter(|name| !name.is_empty());

        let Some(username) = username else {
            return Ok(None);
        };
        let db = self.views.db();
        match db.find_user(&username)? {
            Some(user) => Ok(Some(user)),
            None if auth.create_users => {
                info!(user = %username, "registering new user");
                db.create_user(&username).map(Some)
            }
            None => Ok(None),
        }
    }

    fn dispatch(&self, route: Route, user: Option<&User>, form: &Form) -> ViewResult<Outcome> {
        let views = &self.views;
        match (route, user) {
            (Route::Dashboard, _) => views.dashboard(),
            (Route::Story(id), _) => views.view(id),
            (Route::AddStory, Some(user)) => views.add_story(user, form),
            (Route::Comment(id), Some(user)) => views.comment(user, id, form),
            (Route::SetPriority(id), Some(user)) => views.set_priority(user, id, form),
            (Route::AddTask(id), Some(user)) => views.add_task(user, id, form),
            (Route::EditStory(id), Some(user)) => views.edit_story(user, id, form),
            (Route::EditTask(id), Some(user)) => views.edit_task(user, id, form),
            (Route::DeleteTask(id), Some(user)) => views.delete_task(user, id, form),
            (Route::StoryApi(_), _) | (_, None) => Err(ViewError::BadRequest(
                "Route is not served as a page".to_string(),
            )),
        }
    }

    /// Build the response for one request.
    pub fn respond(&self, request: &mut Request) -> HttpResponse {
        let url = request.url().to_string();
        let path = url.split('?').next().unwrap_or("/").to_string();

        let Some(route) = Route::parse(&path) else {
            return self.error_page(404, &format!("No page at {}", path));
        };
        if *request.method() != route.method() {
            let allowed = route.method().to_string();
            return with_header(
                self.error_page(405, &format!("Use {} for {}", allowed, path)),
                "Allow",
                &allowed,
            );
        }

        if let Route::StoryApi(id) = route {
            return match self.views.story_page(id) {
                Ok(page) => json_response(200, &ApiResponse::success(page)),
                Err(e) => json_response(status_for(&e), &ApiResponse::<()>::failure(e.to_string())),
            };
        }

        let user = if route.is_mutation() {
            match self.authenticate(request) {
                Ok(Some(user)) => Some(user),
                Ok(None) => return redirect_response(&login_redirect(&self.config.auth.login_url, &path)),
                Err(e) => return self.view_error(&ViewError::Db(e)),
            }
        } else {
            None
        };

        let form = if route.is_mutation() {
            let mut body = String::new();
            if let Err(e) = request.as_reader().read_to_string(&mut body) {
                return self.error_page(400, &format!("Failed to read body: {}", e));
            }
            match Form::parse(&body) {
                Ok(form) => form,
                Err(e) => return self.view_error(&ViewError::Form(e)),
            }
        } else {
            Form::default()
        };

        match self.dispatch(route, user.as_ref(), &form) {
            Ok(Outcome::Redirect(location)) => redirect_response(&location),
            Ok(Outcome::Page(html)) => html_response(200, html),
            Err(e) => self.view_error(&e),
        }
    }
}

/// Start the story tracker server
pub fn start(app: App) -> std::io::Result<()> {
    let addr = app.config.bind_addr();
    let server = Server::http(&addr)
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    eprintln!("\n\x1b[1;32mStoryboard\x1b[0m");
    eprintln!("   Listening on http://{}", addr);
    eprintln!("   Press Ctrl+C to stop\n");
    info!(addr = %addr, "server started");

    for mut request in server.incoming_requests() {
        let method = request.method().clone();
        let url = request.url().to_string();
        let response = app.respond(&mut request);
        let status = response.status_code().0;
        info!(%method, url = %url, status, "request");
        if let Err(e) = request.respond(response) {
            warn!("failed to send response: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormError;

    // === ApiResponse Tests ===

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("hello".to_string());
        assert!(response.ok);
        assert_eq!(response.data, Some("hello".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_serializes_to_json() {
        let response: ApiResponse<String> = ApiResponse::success("test".to_string());
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"data\":\"test\""));
        assert!(json.contains("\"error\":null"));
    }

    #[test]
    fn test_api_response_failure() {
        let json = serde_json::to_string(&ApiResponse::<()>::failure("Story 9 not found".into())).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("Story 9 not found"));
    }

    // === Routing Tests ===

    #[test]
    fn test_route_parse_pages() {
        assert_eq!(Route::parse("/"), Some(Route::Dashboard));
        assert_eq!(Route::parse(""), Some(Route::Dashboard));
        assert_eq!(Route::parse("/story/12"), Some(Route::Story(12)));
        assert_eq!(Route::parse("/story/12/"), Some(Route::Story(12)));
        assert_eq!(Route::parse("/api/story/3"), Some(Route::StoryApi(3)));
    }

    #[test]
    fn test_route_parse_mutations() {
        assert_eq!(Route::parse("/story/new"), Some(Route::AddStory));
        assert_eq!(Route::parse("/story/4/comment"), Some(Route::Comment(4)));
        assert_eq!(Route::parse("/story/4/priority"), Some(Route::SetPriority(4)));
        assert_eq!(Route::parse("/story/4/addtask"), Some(Route::AddTask(4)));
        assert_eq!(Route::parse("/story/4/edit"), Some(Route::EditStory(4)));
        assert_eq!(Route::parse("/task/9/edit"), Some(Route::EditTask(9)));
        assert_eq!(Route::parse("/task/9/delete"), Some(Route::DeleteTask(9)));
    }

    #[test]
    fn test_route_parse_rejects_unknown() {
        assert_eq!(Route::parse("/story/abc"), None);
        assert_eq!(Route::parse("/task/9"), None);
        assert_eq!(Route::parse("/story/4/unknown"), None);
        assert_eq!(Route::parse("/favicon.ico"), None);
    }

    #[test]
    fn test_route_methods() {
        assert_eq!(Route::Dashboard.method(), Method::Get);
        assert_eq!(Route::StoryApi(1).method(), Method::Get);
        assert_eq!(Route::DeleteTask(1).method(), Method::Post);
        assert!(Route::AddStory.is_mutation());
        assert!(!Route::Story(1).is_mutation());
    }

    // === Error Mapping Tests ===

    #[test]
    fn test_status_for_errors() {
        assert_eq!(status_for(&ViewError::NotFound("Story 1".into())), 404);
        assert_eq!(status_for(&ViewError::BadRequest("x".into())), 400);
        assert_eq!(
            status_for(&ViewError::Form(FormError::MissingField("title".into()))),
            400
        );
        assert_eq!(status_for(&ViewError::Setup("x".into())), 500);
        assert_eq!(
            status_for(&ViewError::Db(DbError::Connection("down".into()))),
            500
        );
    }

    #[test]
    fn test_login_redirect() {
        assert_eq!(
            login_redirect("/login", "/story/4/comment"),
            "/login?next=%2Fstory%2F4%2Fcomment"
        );
        assert_eq!(
            login_redirect("/auth?provider=sso", "/"),
            "/auth?provider=sso&next=%2F"
        );
    }
}
