//! Sign-in through an external OAuth2 identity provider and the session gate
//! that protects the dataset routes.

use axum::{
    Json, Router,
    extract::{FromRef, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

use crate::query::SortDirection;

pub const SESSION_COOKIE: &str = "session";
pub const STATE_COOKIE: &str = "oauth_state";

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
const SIGN_IN_WINDOW: u64 = 10 * 60;

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo";

/// OAuth2 client registration for one provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_url: String,
    pub scope: String,
}

impl OAuthConfig {
    pub fn google(client_id: String, client_secret: String, redirect_url: String) -> Self {
        OAuthConfig {
            provider_id: "google".to_string(),
            client_id,
            client_secret,
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            redirect_url,
            scope: "email".to_string(),
        }
    }

    /// Provider URL the browser is sent to for the authorization-code grant.
    pub fn authorization_request_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state),
        )
    }
}

/// Access token handed out by the provider.
///
/// `secret` is always empty for OAuth2 providers; it is kept so the token has the
/// same (token, secret) shape that OAuth1-style clients expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedToken {
    pub access_token: String,
    pub secret: String,
    pub expires_in: Option<u64>,
}

impl DelegatedToken {
    pub fn bearer(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        DelegatedToken {
            access_token: access_token.into(),
            secret: String::new(),
            expires_in,
        }
    }
}

/// Last sort/filter a user picked on the portal page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewPrefs {
    pub sort_by: Option<String>,
    pub sort_order: SortDirection,
    pub filter_column: Option<String>,
    pub filter_query: Option<String>,
}

/// Signed-in browser session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: DelegatedToken,
    pub provider: String,
    pub expires_at: SystemTime,
    pub email: Option<String>,
    pub view: Option<ViewPrefs>,
}

impl Session {
    /// A fresh session lasting until the token expires, capped at 24 hours.
    pub fn establish(token: DelegatedToken, provider: &str, now: SystemTime) -> Self {
        let lifetime = token
            .expires_in
            .map_or(SESSION_DURATION, |secs| secs.min(SESSION_DURATION));
        Session {
            token,
            provider: provider.to_string(),
            expires_at: now + Duration::from_secs(lifetime),
            email: None,
            view: None,
        }
    }

    pub fn is_valid(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }
}

/// Query string of the provider's redirect back to `/login/authorized`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Access denied: reason={reason} error={description}")]
    Denied { reason: String, description: String },

    #[error("Access denied: reason=invalid_state error=sign-in attempt not recognised")]
    StateMismatch,

    #[error("Access denied: reason=token_exchange error={0}")]
    Exchange(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::FORBIDDEN, self.to_string()).into_response()
    }
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

/// The external identity provider: builds the consent URL and redeems codes.
pub trait IdentityProvider: Send + Sync {
    fn id(&self) -> &str;

    fn authorize_url(&self, state: &str) -> String;

    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, DelegatedToken>;

    /// Email of the signed-in user, if the provider shares one.
    fn fetch_email<'a>(&'a self, token: &'a DelegatedToken) -> ProviderFuture<'a, Option<String>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
}

/// Google (or any standards-following) OAuth2 provider over HTTPS.
pub struct GoogleProvider {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: OAuthConfig) -> Self {
        GoogleProvider {
            config,
            http: reqwest::Client::new(),
        }
    }
}

impl IdentityProvider for GoogleProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn authorize_url(&self, state: &str) -> String {
        self.config.authorization_request_url(state)
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, DelegatedToken> {
        Box::pin(async move {
            let params = [
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ];
            let response = self
                .http
                .post(&self.config.token_url)
                .form(&params)
                .send()
                .await
                .map_err(|e| AuthError::Exchange(e.to_string()))?;

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::Exchange(e.to_string()))?;

            match body.access_token {
                Some(token) => Ok(DelegatedToken::bearer(token, body.expires_in)),
                None => Err(AuthError::Denied {
                    reason: body.error.unwrap_or_else(|| "no_access_token".to_string()),
                    description: body
                        .error_description
                        .unwrap_or_else(|| "provider returned no access token".to_string()),
                }),
            }
        })
    }

    fn fetch_email<'a>(&'a self, token: &'a DelegatedToken) -> ProviderFuture<'a, Option<String>> {
        Box::pin(async move {
            let response = self
                .http
                .get(&self.config.userinfo_url)
                .bearer_auth(&token.access_token)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| AuthError::Exchange(e.to_string()))?;

            let info: UserInfo = response
                .json()
                .await
                .map_err(|e| AuthError::Exchange(e.to_string()))?;
            Ok(info.email)
        })
    }
}

/// Outcome of [`AuthGate::begin_sign_in`].
#[derive(Debug, Clone)]
pub struct SignIn {
    pub state: String,
    pub authorize_url: String,
}

/// Session table plus the pending sign-in attempts.
pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
    sessions: RwLock<HashMap<String, Session>>,
    pending: RwLock<HashMap<String, SystemTime>>,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        AuthGate {
            provider,
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// True if `session_id` names a live, unexpired session.
    pub fn is_authenticated(&self, session_id: Option<&str>) -> bool {
        session_id.and_then(|id| self.session(id)).is_some()
    }

    /// Copy of the session for `session_id`. Expired sessions are dropped here.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        let now = SystemTime::now();
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(session_id) {
                Some(session) if session.is_valid(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        None
    }

    /// Start a sign-in: remember a fresh `state` and build the consent URL.
    pub fn begin_sign_in(&self) -> SignIn {
        let state = Uuid::new_v4().to_string();
        let now = SystemTime::now();

        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, started| {
            now.duration_since(*started)
                .map_or(true, |age| age.as_secs() < SIGN_IN_WINDOW)
        });
        pending.insert(state.clone(), now);

        SignIn {
            authorize_url: self.provider.authorize_url(&state),
            state,
        }
    }

    /// Finish a sign-in from the provider's redirect.
    ///
    /// `expected_state` is the value the browser carried in its state cookie.
    /// On success the new session id is returned.
    ///
    /// # Errors
    /// * `Denied` if the provider reported an error or sent no code
    /// * `StateMismatch` if the state is unknown, stale or differs from the cookie
    /// * `Exchange` if the code could not be redeemed
    pub async fn complete_sign_in(
        &self,
        response: ProviderResponse,
        expected_state: Option<&str>,
    ) -> Result<String, AuthError> {
        let code = match response.code.as_deref() {
            Some(code) if response.error.is_none() && !code.is_empty() => code.to_string(),
            _ => {
                return Err(AuthError::Denied {
                    reason: response
                        .error_reason
                        .or(response.error)
                        .unwrap_or_else(|| "missing_code".to_string()),
                    description: response
                        .error_description
                        .unwrap_or_else(|| "no authorization code returned".to_string()),
                });
            }
        };

        let state = response.state.unwrap_or_default();
        if expected_state != Some(state.as_str()) || !self.take_pending(&state) {
            return Err(AuthError::StateMismatch);
        }

        let token = self.provider.exchange_code(&code).await?;
        let mut session = Session::establish(token, self.provider.id(), SystemTime::now());
        match self.provider.fetch_email(&session.token).await {
            Ok(email) => session.email = email,
            Err(e) => log::warn!("could not fetch user profile: {}", e),
        }

        let session_id = Uuid::new_v4().to_string();
        log::info!(
            "signed in {} via {}",
            session.email.as_deref().unwrap_or("<unknown>"),
            session.provider
        );
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, existing| existing.is_valid(now));
        sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Drop the session. Returns whether one existed.
    pub fn sign_out(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some()
    }

    pub fn remember_view(&self, session_id: &str, view: ViewPrefs) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            session.view = Some(view);
        }
    }

    /// Insert a session directly, bypassing the provider.
    pub fn insert_session(&self, session: Session) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone(), session);
        session_id
    }

    fn take_pending(&self, state: &str) -> bool {
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        match pending.remove(state) {
            Some(started) => SystemTime::now()
                .duration_since(started)
                .map_or(true, |age| age.as_secs() < SIGN_IN_WINDOW),
            None => false,
        }
    }
}

/// What the gate answers when a request has no valid session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnauthenticated {
    /// Browser pages: send the user to `/login`
    Redirect,
    /// JSON endpoints: 401 with an error body
    Reject,
}

/// State shared by the sign-in routes and the gate middleware.
#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<AuthGate>,
    pub key: Key,
    pub on_unauthenticated: OnUnauthenticated,
}

impl FromRef<AuthState> for Key {
    fn from_ref(state: &AuthState) -> Self {
        state.key.clone()
    }
}

/// Cookie signing key: derived from the configured secret, random otherwise.
pub fn signing_key(secret: Option<&[u8]>) -> Key {
    match secret {
        Some(secret) => Key::derive_from(secret),
        None => {
            log::warn!("no SECRET_KEY configured, sessions will not survive a restart");
            Key::generate()
        }
    }
}

/// The authenticated session attached to a request by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub session: Session,
}

/// `/login`, `/logout` and `/login/authorized`, ready to merge into any router.
pub fn routes<S>(state: AuthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/login", get(handle_login))
        .route("/logout", get(handle_logout))
        .route("/login/authorized", get(handle_authorized))
        .with_state(state)
}

fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Redirect to the provider's consent page.
pub async fn handle_login(
    State(auth): State<AuthState>,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect) {
    let sign_in = auth.gate.begin_sign_in();
    let cookie = Cookie::build((STATE_COOKIE, sign_in.state))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), Redirect::to(&sign_in.authorize_url))
}

/// OAuth redirect target.
pub async fn handle_authorized(
    State(auth): State<AuthState>,
    jar: SignedCookieJar,
    Query(response): Query<ProviderResponse>,
) -> Response {
    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));

    match auth.gate.complete_sign_in(response, expected.as_deref()).await {
        Ok(session_id) => (jar.add(session_cookie(session_id)), Redirect::to("/")).into_response(),
        Err(e) => {
            log::warn!("sign-in failed: {}", e);
            (jar, e).into_response()
        }
    }
}

/// Forget the session and go back to the index (which bounces to `/login`).
pub async fn handle_logout(
    State(auth): State<AuthState>,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if auth.gate.sign_out(cookie.value()) {
            log::info!("signed out");
        }
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

/// Authentication middleware
///
/// Lets the request through with a [`CurrentSession`] extension when the signed
/// session cookie names a live session; otherwise redirects or rejects depending
/// on [`AuthState::on_unauthenticated`].
pub async fn require_session(
    State(auth): State<AuthState>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        if let Some(session) = auth.gate.session(&id) {
            request.extensions_mut().insert(CurrentSession { id, session });
            return next.run(request).await;
        }
    }

    match auth.on_unauthenticated {
        OnUnauthenticated::Redirect => Redirect::to("/login").into_response(),
        OnUnauthenticated::Reject => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Not signed in" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    impl IdentityProvider for StubProvider {
        fn id(&self) -> &str {
            "stub"
        }

        fn authorize_url(&self, state: &str) -> String {
            format!("https://idp.test/auth?state={}", state)
        }

        fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, DelegatedToken> {
            Box::pin(async move {
                if code == "good" {
                    Ok(DelegatedToken::bearer("tok", Some(3600)))
                } else {
                    Err(AuthError::Exchange("invalid_grant".into()))
                }
            })
        }

        fn fetch_email<'a>(
            &'a self,
            _token: &'a DelegatedToken,
        ) -> ProviderFuture<'a, Option<String>> {
            Box::pin(async move { Ok(Some("user@example.com".to_string())) })
        }
    }

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(StubProvider))
    }

    fn callback(code: &str, state: &str) -> ProviderResponse {
        ProviderResponse {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_sign_in_creates_a_session() {
        let gate = gate();
        let sign_in = gate.begin_sign_in();
        assert!(sign_in.authorize_url.ends_with(&sign_in.state));

        let id = gate
            .complete_sign_in(callback("good", &sign_in.state), Some(sign_in.state.as_str()))
            .await
            .unwrap();

        assert!(gate.is_authenticated(Some(id.as_str())));
        let session = gate.session(&id).unwrap();
        assert_eq!(session.email.as_deref(), Some("user@example.com"));
        assert_eq!(session.provider, "stub");
        assert_eq!(session.token.secret, "");
    }

    #[tokio::test]
    async fn provider_error_is_reported_verbatim() {
        let gate = gate();
        let response = ProviderResponse {
            error: Some("access_denied".into()),
            error_reason: Some("user_denied".into()),
            error_description: Some("The user denied access".into()),
            ..Default::default()
        };
        let err = gate.complete_sign_in(response, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access denied: reason=user_denied error=The user denied access"
        );
    }

    #[tokio::test]
    async fn state_must_match_cookie_and_be_pending() {
        let gate = gate();
        let sign_in = gate.begin_sign_in();

        let err = gate
            .complete_sign_in(callback("good", &sign_in.state), Some("other"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::StateMismatch);

        let err = gate
            .complete_sign_in(callback("good", "forged"), Some("forged"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::StateMismatch);
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let gate = gate();
        let sign_in = gate.begin_sign_in();
        let state = sign_in.state.as_str();
        gate.complete_sign_in(callback("good", state), Some(state))
            .await
            .unwrap();
        let again = gate
            .complete_sign_in(callback("good", state), Some(state))
            .await;
        assert_eq!(again.unwrap_err(), AuthError::StateMismatch);
    }

    #[tokio::test]
    async fn failed_exchange_creates_no_session() {
        let gate = gate();
        let sign_in = gate.begin_sign_in();
        let err = gate
            .complete_sign_in(callback("bad", &sign_in.state), Some(sign_in.state.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Exchange(_)));
        assert_eq!(gate.sessions.read().unwrap().len(), 0);
    }

    #[test]
    fn sign_out_invalidates() {
        let gate = gate();
        let id = gate.insert_session(Session::establish(
            DelegatedToken::bearer("t", None),
            "stub",
            SystemTime::now(),
        ));
        assert!(gate.is_authenticated(Some(id.as_str())));
        assert!(gate.sign_out(&id));
        assert!(!gate.is_authenticated(Some(id.as_str())));
        assert!(!gate.sign_out(&id));
        assert!(!gate.is_authenticated(None));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let gate = gate();
        let long_ago = SystemTime::now() - Duration::from_secs(2 * SESSION_DURATION);
        let id = gate.insert_session(Session::establish(
            DelegatedToken::bearer("t", None),
            "stub",
            long_ago,
        ));
        assert!(!gate.is_authenticated(Some(id.as_str())));
        assert!(gate.sessions.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sign_in_prunes_abandoned_sessions() {
        let gate = gate();
        let long_ago = SystemTime::now() - Duration::from_secs(2 * SESSION_DURATION);
        for _ in 0..3 {
            gate.insert_session(Session::establish(
                DelegatedToken::bearer("t", None),
                "stub",
                long_ago,
            ));
        }
        let live = gate.insert_session(Session::establish(
            DelegatedToken::bearer("t", None),
            "stub",
            SystemTime::now(),
        ));

        let sign_in = gate.begin_sign_in();
        let id = gate
            .complete_sign_in(callback("good", &sign_in.state), Some(sign_in.state.as_str()))
            .await
            .unwrap();

        let sessions = gate.sessions.read().unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains_key(&id));
        assert!(sessions.contains_key(&live));
    }

    #[test]
    fn session_lifetime_is_capped() {
        let now = SystemTime::now();
        let short = Session::establish(DelegatedToken::bearer("t", Some(60)), "g", now);
        assert_eq!(short.expires_at, now + Duration::from_secs(60));
        let long = Session::establish(DelegatedToken::bearer("t", Some(10_000_000)), "g", now);
        assert_eq!(long.expires_at, now + Duration::from_secs(SESSION_DURATION));
    }

    #[test]
    fn remembered_view_is_stored_on_the_session() {
        let gate = gate();
        let id = gate.insert_session(Session::establish(
            DelegatedToken::bearer("t", None),
            "stub",
            SystemTime::now(),
        ));
        let view = ViewPrefs {
            sort_by: Some("age".into()),
            sort_order: SortDirection::Desc,
            ..Default::default()
        };
        gate.remember_view(&id, view.clone());
        assert_eq!(gate.session(&id).unwrap().view, Some(view));
    }

    #[test]
    fn google_authorize_url_is_encoded() {
        let config = OAuthConfig::google(
            "client id".into(),
            "secret".into(),
            "http://localhost:5000/login/authorized".into(),
        );
        let url = config.authorization_request_url("abc");
        assert!(url.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Flogin%2Fauthorized"));
        assert!(url.contains("scope=email"));
        assert!(url.ends_with("state=abc"));
    }
}
