//! Request Handler
//!
//! Turns a parsed [`Request`] into a [`Response`]. This is the only place
//! that talks to the content provider and the credential store; the reactor
//! never calls either directly.
//!
//! ## Routing
//!
//! ```text
//! POST /login.html    (form) ──verify──▶ /welcome.html | /error.html
//! POST /register.html (form) ──verify──▶ /welcome.html | /error.html
//! anything else              ──────────▶ path as requested
//!                                             │
//!                                             ▼
//!                                    ContentProvider::lookup
//!                                     Found ─▶ 200
//!                                     NotFound ─▶ 404 (/404.html)
//!                                     Forbidden ─▶ 403 (/403.html)
//! ```

use crate::config::ServerConfig;
use crate::protocol::types::mime_type;
use crate::protocol::{Method, Request, Response, StatusCode};
use crate::service::content::{Content, ContentProvider, FileContentProvider};
use crate::service::form::{is_form_urlencoded, parse_form_data};
use crate::storage::{CredentialStore, InMemoryCredentialStore};
use std::sync::Arc;
use tracing::{debug, info};

pub const LOGIN_ROUTE: &str = "/login.html";
pub const REGISTER_ROUTE: &str = "/register.html";
pub const WELCOME_PAGE: &str = "/welcome.html";
pub const ERROR_PAGE: &str = "/error.html";

/// Shared, cheaply cloneable request handler.
#[derive(Clone)]
pub struct RequestHandler {
    content: Arc<dyn ContentProvider>,
    credentials: Arc<dyn CredentialStore>,
    keep_alive_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("keep_alive_timeout_secs", &self.keep_alive_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl RequestHandler {
    pub fn new(content: Arc<dyn ContentProvider>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            content,
            credentials,
            keep_alive_timeout_secs: None,
        }
    }

    /// File-backed content from `resource_dir` and an empty in-memory store.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Arc::new(FileContentProvider::new(&config.resource_dir)),
            Arc::new(InMemoryCredentialStore::new()),
        )
        .with_keep_alive_timeout(config.idle_timeout_secs())
    }

    /// Seconds advertised in the `Keep-Alive` header.
    pub fn with_keep_alive_timeout(mut self, secs: Option<u64>) -> Self {
        self.keep_alive_timeout_secs = secs;
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Builds the response for a complete request.
    pub fn handle(&self, request: &Request, keep_alive: bool) -> Response {
        let path = self.route(request);

        match self.content.lookup(&path) {
            Content::Found(body) => self.response(StatusCode::Ok, mime_type(&path), body, keep_alive),
            Content::NotFound => self.error_response(StatusCode::NotFound, keep_alive),
            Content::Forbidden => self.error_response(StatusCode::Forbidden, keep_alive),
        }
    }

    /// Response for a request that failed to parse. Always closes.
    pub fn bad_request(&self) -> Response {
        self.error_response(StatusCode::BadRequest, false)
    }

    /// Serves `/<code>.html` for the status, falling back to an inline page.
    pub fn error_response(&self, status: StatusCode, keep_alive: bool) -> Response {
        let page = format!("/{}.html", status.as_u16());
        let body = match self.content.lookup(&page) {
            Content::Found(body) => body,
            _ => Response::error_body(status),
        };
        self.response(status, "text/html", body, keep_alive)
    }

    fn response(&self, status: StatusCode, content_type: &'static str, body: bytes::Bytes, keep_alive: bool) -> Response {
        Response::new(status, content_type, body, keep_alive, self.keep_alive_timeout_secs)
    }

    /// Resolves the path to serve, running the form routes on the way.
    fn route(&self, request: &Request) -> String {
        if request.method != Method::Post {
            return request.path.clone();
        }
        let is_login = match request.path.as_str() {
            LOGIN_ROUTE => true,
            REGISTER_ROUTE => false,
            _ => return request.path.clone(),
        };
        if !request.header("Content-Type").is_some_and(is_form_urlencoded) {
            return request.path.clone();
        }

        let form = parse_form_data(&request.body);
        let username = form.get("username").map(String::as_str).unwrap_or("");
        let password = form.get("password").map(String::as_str).unwrap_or("");

        if self.credentials.verify(username, password, is_login) {
            info!(user = %username, login = is_login, "Credential check passed");
            WELCOME_PAGE.to_string()
        } else {
            debug!(user = %username, login = is_login, "Credential check failed");
            ERROR_PAGE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::content::MemoryContentProvider;
    use bytes::Bytes;
    use std::collections::HashMap;

    fn handler() -> RequestHandler {
        let content = MemoryContentProvider::new()
            .with_document("/index.html", "<p>home</p>")
            .with_document("/style.css", "body{}")
            .with_document("/welcome.html", "welcome")
            .with_document("/error.html", "error")
            .with_document("/404.html", "custom 404")
            .with_forbidden("/private.html");
        RequestHandler::new(
            Arc::new(content),
            Arc::new(InMemoryCredentialStore::with_users([("ariz", "pw")])),
        )
        .with_keep_alive_timeout(Some(60))
    }

    fn request(method: Method, path: &str, headers: &[(&str, &str)], body: &'static [u8]) -> Request {
        Request {
            method,
            path: path.to_string(),
            version: "1.1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: Bytes::from_static(body),
        }
    }

    fn form_post(path: &str, body: &'static [u8]) -> Request {
        request(
            Method::Post,
            path,
            &[("Content-Type", "application/x-www-form-urlencoded")],
            body,
        )
    }

    #[test]
    fn test_get_found() {
        let response = handler().handle(&request(Method::Get, "/style.css", &[], b""), true);
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.head.content_type, "text/css");
        assert_eq!(response.head.content_length, 6);
        assert_eq!(response.head.keep_alive_timeout_secs, Some(60));
        assert!(response.is_keep_alive());
    }

    #[test]
    fn test_not_found_uses_error_page() {
        let response = handler().handle(&request(Method::Get, "/missing.png", &[], b""), false);
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.body, Bytes::from_static(b"custom 404"));
        assert_eq!(response.head.content_type, "text/html");
    }

    #[test]
    fn test_forbidden_falls_back_to_inline_page() {
        let response = handler().handle(&request(Method::Get, "/private.html", &[], b""), true);
        assert_eq!(response.status(), StatusCode::Forbidden);
        assert!(std::str::from_utf8(&response.body).unwrap().contains("403 : Forbidden"));
    }

    #[test]
    fn test_bad_request_closes() {
        let response = handler().bad_request();
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(!response.is_keep_alive());
    }

    #[test]
    fn test_login_success_and_failure() {
        let h = handler();

        let ok = h.handle(&form_post(LOGIN_ROUTE, b"username=ariz&password=pw"), true);
        assert_eq!(ok.body, Bytes::from_static(b"welcome"));

        let bad = h.handle(&form_post(LOGIN_ROUTE, b"username=ariz&password=nope"), true);
        assert_eq!(bad.body, Bytes::from_static(b"error"));
    }

    #[test]
    fn test_register_creates_user() {
        let h = handler();

        let first = h.handle(&form_post(REGISTER_ROUTE, b"username=new+user&password=x"), true);
        assert_eq!(first.body, Bytes::from_static(b"welcome"));
        assert!(h.credentials().verify("new user", "x", true));

        let again = h.handle(&form_post(REGISTER_ROUTE, b"username=new+user&password=y"), true);
        assert_eq!(again.body, Bytes::from_static(b"error"));
    }

    #[test]
    fn test_post_without_form_content_type_serves_path() {
        let response = handler().handle(
            &request(Method::Post, LOGIN_ROUTE, &[("Content-Type", "text/plain")], b"x"),
            true,
        );
        assert_eq!(response.status(), StatusCode::NotFound);
    }
}
