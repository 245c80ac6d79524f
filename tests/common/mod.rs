#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use rust_xlsxwriter::Workbook;
use sheet_browser::auth::{
    AuthError, DelegatedToken, IdentityProvider, ProviderFuture,
};
use sheet_browser::config::Settings;
use std::path::Path;
use tower::ServiceExt;

pub const BOUNDARY: &str = "sheet-browser-test-boundary";

/// Provider that accepts the code `good` and never leaves the process.
pub struct StubProvider;

impl IdentityProvider for StubProvider {
    fn id(&self) -> &str {
        "stub"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("https://idp.test/auth?state={}", state)
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, DelegatedToken> {
        Box::pin(async move {
            match code {
                "good" => Ok(DelegatedToken::bearer("token", Some(3600))),
                _ => Err(AuthError::Exchange("invalid_grant".into())),
            }
        })
    }

    fn fetch_email<'a>(&'a self, _token: &'a DelegatedToken) -> ProviderFuture<'a, Option<String>> {
        Box::pin(async { Ok(Some("tester@example.com".to_string())) })
    }
}

pub fn settings(data_dir: &Path, page_size: usize, allowed: &[&str]) -> Settings {
    Settings {
        bind_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        page_size,
        allowed_extensions: allowed.iter().map(|e| e.to_string()).collect(),
        upload_limit_bytes: 1024 * 1024,
        public_url: "http://localhost:5000".to_string(),
        secret_key: None,
    }
}

pub fn people_xlsx() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "name").unwrap();
    sheet.write_string(0, 1, "age").unwrap();
    sheet.write_string(1, 0, "Bob").unwrap();
    sheet.write_number(1, 1, 5).unwrap();
    sheet.write_string(2, 0, "al").unwrap();
    sheet.write_number(2, 1, 30).unwrap();
    workbook.save_to_buffer().unwrap()
}

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(filename: &str, content: &[u8], cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/upload").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(multipart_body("file", filename, content)))
        .unwrap()
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `name=value` of the Set-Cookie header for `name`.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
        .map(str::to_string)
}

/// Walk `/login` → `/login/authorized` and return the session cookie.
pub async fn sign_in(app: &Router) -> String {
    let login = send(app, get("/login", None)).await;
    assert_eq!(login.status(), StatusCode::SEE_OTHER);
    let state = location(&login)
        .split("state=")
        .nth(1)
        .expect("state in authorize url")
        .to_string();
    let state_cookie = set_cookie(&login, "oauth_state").expect("state cookie");

    let callback = send(
        app,
        get(
            &format!("/login/authorized?code=good&state={}", state),
            Some(&state_cookie),
        ),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&callback), "/");
    set_cookie(&callback, "session").expect("session cookie")
}
