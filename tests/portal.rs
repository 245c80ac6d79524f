#![cfg(feature = "web")]

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use axum_extra::extract::cookie::Key;
use common::*;
use sheet_browser::app::{self, AppState};
use sheet_browser::auth::{AuthGate, AuthState, OnUnauthenticated};
use sheet_browser::loader;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const PEOPLE_CSV: &[u8] = b"name,age\nBob,5\nal,30\nCy,\n";

fn portal(data_dir: &Path, page_size: usize) -> (Router, Arc<AppState>) {
    let gate = Arc::new(AuthGate::new(Arc::new(StubProvider)));
    let auth = AuthState {
        gate: Arc::clone(&gate),
        key: Key::generate(),
        on_unauthenticated: OnUnauthenticated::Redirect,
    };
    let settings = settings(data_dir, page_size, &["csv", "xlsx"]);
    let state = Arc::new(AppState::new(&settings, gate).unwrap());
    (app::router(Arc::clone(&state), auth), state)
}

async fn signed_in_portal(page_size: usize) -> (Router, Arc<AppState>, String, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = portal(dir.path(), page_size);
    let session = sign_in(&app).await;
    (app, state, session, dir)
}

async fn upload_people(app: &Router, session: &str) {
    let response = send(app, upload_request("people.csv", PEOPLE_CSV, Some(session))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

fn post(uri: &str, session: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::COOKIE, session)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn anonymous_visitors_are_sent_to_login() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = portal(dir.path(), 50);

    let response = send(&app, get("/", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let response = send(&app, upload_request("people.csv", PEOPLE_CSV, None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(!dir.path().join("data.csv").exists());
}

#[tokio::test]
async fn login_redirects_to_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = portal(dir.path(), 50);

    let response = send(&app, get("/login", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("https://idp.test/auth?state="));
    assert!(set_cookie(&response, "oauth_state").is_some());
}

#[tokio::test]
async fn denied_sign_in_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = portal(dir.path(), 50);

    let response = send(
        &app,
        get(
            "/login/authorized?error=access_denied&error_reason=user_denied&error_description=nope",
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_text(response).await,
        "Access denied: reason=user_denied error=nope"
    );
}

#[tokio::test]
async fn callback_without_state_cookie_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = portal(dir.path(), 50);

    let login = send(&app, get("/login", None)).await;
    let state = location(&login).split("state=").nth(1).unwrap().to_string();

    let response = send(
        &app,
        get(&format!("/login/authorized?code=good&state={}", state), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie(&response, "session").is_none());
}

#[tokio::test]
async fn empty_portal_invites_an_upload() {
    let (app, _state, session, _dir) = signed_in_portal(50).await;

    let response = send(&app, get("/", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("No dataset loaded"));
    assert!(html.contains("tester@example.com"));
}

#[tokio::test]
async fn upload_replaces_the_dataset_and_persists_it() {
    let (app, state, session, dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    assert_eq!(state.store().current().row_count(), 3);
    assert!(dir.path().join("data.csv").is_file());

    let html = body_text(send(&app, get("/", Some(&session))).await).await;
    assert!(html.contains("<td>Bob</td>"));
    assert!(html.contains("<td>al</td>"));
    // numeric column gap
    assert!(html.contains("<td>N/A</td>"));
    assert!(html.contains("of 3"));
}

#[tokio::test]
async fn filter_and_sort_through_query_parameters() {
    let (app, _state, session, _dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    let html = body_text(
        send(
            &app,
            get("/?filter_column=name&filter_query=A", Some(&session)),
        )
        .await,
    )
    .await;
    assert!(html.contains("<td>al</td>"));
    assert!(!html.contains("<td>Bob</td>"));

    let html = body_text(
        send(&app, get("/?sort_by=age&sort_order=desc", Some(&session))).await,
    )
    .await;
    let al = html.find("<td>al</td>").unwrap();
    let bob = html.find("<td>Bob</td>").unwrap();
    let cy = html.find("<td>Cy</td>").unwrap();
    assert!(al < bob && bob < cy);
}

#[tokio::test]
async fn last_view_is_remembered_per_session() {
    let (app, _state, session, _dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    send(&app, get("/?filter_column=name&filter_query=bo", Some(&session))).await;

    let html = body_text(send(&app, get("/", Some(&session))).await).await;
    assert!(html.contains("<td>Bob</td>"));
    assert!(!html.contains("<td>al</td>"));

    // an explicit empty filter resets it
    let html = body_text(send(&app, get("/?filter_query=", Some(&session))).await).await;
    assert!(html.contains("<td>al</td>"));
}

#[tokio::test]
async fn pages_follow_the_page_size() {
    let (app, _state, session, _dir) = signed_in_portal(2).await;
    upload_people(&app, &session).await;

    let html = body_text(send(&app, get("/?page=2", Some(&session))).await).await;
    assert!(html.contains("<td>Cy</td>"));
    assert!(!html.contains("<td>Bob</td>"));
    assert!(html.contains("Page 2 of 2"));
}

#[tokio::test]
async fn unknown_column_shows_an_error() {
    let (app, _state, session, _dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    let response = send(&app, get("/?sort_by=zip", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let html = body_text(response).await;
    assert!(html.contains("not found"));
    assert!(html.contains("<td>Bob</td>"));

    // the bad view is not remembered
    let response = send(&app, get("/", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rejected_upload_keeps_the_current_dataset() {
    let (app, state, session, dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    let response = send(&app, upload_request("notes.txt", b"hello", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("not allowed"));

    let response = send(&app, upload_request("broken.xlsx", b"garbage", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(state.store().current().row_count(), 3);
    assert!(dir.path().join("data.csv").is_file());
    assert!(!dir.path().join("data.xlsx").exists());
}

#[tokio::test]
async fn xlsx_upload_replaces_csv_on_disk() {
    let (app, state, session, dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    let response = send(&app, upload_request("people.xlsx", &people_xlsx(), Some(&session))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(state.store().current().row_count(), 2);
    assert!(dir.path().join("data.xlsx").is_file());
    assert!(!dir.path().join("data.csv").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_leave_disk_and_memory_in_step() {
    let (app, state, session, dir) = signed_in_portal(50).await;

    let mut uploads = tokio::task::JoinSet::new();
    for rows in 1..=8 {
        let app = app.clone();
        let session = session.clone();
        let mut body = String::from("n\n");
        for i in 0..rows {
            body.push_str(&format!("{}\n", i));
        }
        uploads.spawn(async move {
            send(&app, upload_request("batch.csv", body.as_bytes(), Some(&session)))
                .await
                .status()
        });
    }
    while let Some(status) = uploads.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::SEE_OTHER);
    }

    let on_disk = loader::load_path(dir.path().join("data.csv")).unwrap();
    assert_eq!(on_disk.row_count(), state.store().current().row_count());
}

#[tokio::test]
async fn clear_empties_memory_and_disk() {
    let (app, state, session, dir) = signed_in_portal(50).await;
    upload_people(&app, &session).await;

    let response = send(&app, post("/clear", &session)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(state.store().current().is_empty());
    assert!(!dir.path().join("data.csv").exists());

    let html = body_text(send(&app, get("/", Some(&session))).await).await;
    assert!(html.contains("No dataset loaded"));
}

#[tokio::test]
async fn stored_dataset_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.csv"), PEOPLE_CSV).unwrap();

    let (_app, state) = portal(dir.path(), 50);
    assert_eq!(state.store().current().row_count(), 3);
    assert_eq!(state.store().current().headers(), &["name", "age"]);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (app, _state, session, _dir) = signed_in_portal(50).await;

    let response = send(&app, get("/logout", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = send(&app, get("/", Some(&session))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}
