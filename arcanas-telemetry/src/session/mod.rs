//! Authenticated session state
//!
//! The store is the only writer of [`SessionState`]. Consumers get immutable
//! snapshots (or a `watch` receiver) and derive capabilities from them.
//!
//! Login and logout take a generation number when they start; a result is
//! committed only if no newer login / logout started meanwhile. `validate()`
//! never takes a generation of its own: it is skipped while a login or logout
//! is in flight, and its result is dropped if one starts before it returns.

pub mod auth;

pub use auth::{AuthApi, HttpAuthApi, LoginResponse, ValidateResponse};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const LOGIN_FAILED: &str = "Login failed";

/// Coarse state of the session machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Unauthenticated,
    Authenticated,
    Failed,
}

/// Snapshot of the current user's authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    is_authenticated: bool,
    username: Option<String>,
    is_root: bool,
    is_admin: bool,
    loading: bool,
    error: Option<String>,
}

impl SessionState {
    /// State at startup, before the first validation
    pub fn initial() -> Self {
        Self {
            loading: true,
            ..Self::signed_out()
        }
    }

    fn signed_out() -> Self {
        Self {
            is_authenticated: false,
            username: None,
            is_root: false,
            is_admin: false,
            loading: false,
            error: None,
        }
    }

    fn authenticated(username: Option<String>, is_root: bool, is_admin: bool) -> Self {
        Self {
            is_authenticated: true,
            username,
            is_root,
            is_admin,
            loading: false,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            error: Some(message),
            ..Self::signed_out()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn can_manage_all_shares(&self) -> bool {
        self.is_admin || self.is_root
    }

    pub fn phase(&self) -> SessionPhase {
        if self.loading {
            SessionPhase::Loading
        } else if self.is_authenticated {
            SessionPhase::Authenticated
        } else if self.error.is_some() {
            SessionPhase::Failed
        } else {
            SessionPhase::Unauthenticated
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Single authority over the session state
pub struct SessionStore {
    auth: Arc<dyn AuthApi>,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
    /// Logins and logouts that have started but not returned
    in_flight: AtomicUsize,
}

/// Marks a login / logout as in flight until dropped
struct InFlight<'a> {
    store: &'a SessionStore,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            auth,
            state,
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_admin(&self) -> bool {
        self.state.borrow().is_admin()
    }

    pub fn is_root(&self) -> bool {
        self.state.borrow().is_root()
    }

    pub fn can_manage_all_shares(&self) -> bool {
        self.state.borrow().can_manage_all_shares()
    }

    /// Log in; returns whether this call left the session authenticated.
    ///
    /// Failures are stored as a user-visible error, never returned.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        let op = self.begin(|state| {
            state.loading = true;
            state.error = None;
        });

        match self.auth.login(username, password).await {
            Ok(response) => {
                let next = SessionState::authenticated(
                    Some(response.username),
                    response.is_root,
                    response.is_admin,
                );
                let committed = self.commit(op.generation, next);
                if committed {
                    info!(username, "Login succeeded");
                }
                committed
            }
            Err(e) => {
                let message = e.to_string();
                let message = if message.is_empty() { LOGIN_FAILED.to_string() } else { message };
                warn!(username, error = %message, "Login failed");
                self.commit(op.generation, SessionState::failed(message));
                false
            }
        }
    }

    /// Log out. The session ends locally whatever the server answers.
    pub async fn logout(&self) {
        let op = self.begin(|state| *state = SessionState::signed_out());

        if let Err(e) = self.auth.logout().await {
            error!(error = %e, "Logout error");
        }
        if self.commit(op.generation, SessionState::signed_out()) {
            info!("Logged out");
        }
    }

    /// Re-check the server session. Any failure means "not logged in", silently.
    ///
    /// No-op while a login or logout is in flight: that operation decides the state.
    pub async fn validate(&self) {
        let Some(generation) = self.begin_validate() else {
            debug!("Login or logout in flight, skipping session validation");
            return;
        };

        let next = match self.auth.validate().await {
            Ok(response) if response.valid => {
                SessionState::authenticated(response.username, response.is_root, response.is_admin)
            }
            Ok(_) => SessionState::signed_out(),
            Err(e) => {
                debug!(error = %e, "Session validation failed, treating as signed out");
                SessionState::signed_out()
            }
        };
        self.commit(generation, next);
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// Start a login / logout: new generation plus its entry transition, atomically.
    fn begin(&self, enter: impl FnOnce(&mut SessionState)) -> InFlight<'_> {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            enter(state);
        });
        InFlight { store: self, generation }
    }

    /// Start a validation against the current generation, unless a login / logout is pending.
    fn begin_validate(&self) -> Option<u64> {
        let mut generation = None;
        self.state.send_if_modified(|state| {
            if self.in_flight.load(Ordering::SeqCst) > 0 {
                return false;
            }
            generation = Some(self.generation.load(Ordering::SeqCst));
            state.loading = true;
            true
        });
        generation
    }

    /// Replace the state if no login / logout started after `generation`.
    fn commit(&self, generation: u64, next: SessionState) -> bool {
        let committed = self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = next;
            true
        });
        if !committed && self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Discarding result of a superseded session operation");
        }
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    fn rejected(status: StatusCode) -> ApiError {
        ApiError::Status { status, body: String::new() }
    }

    /// Scripted Auth API: accepts one credential pair, optional gate on each call
    struct ScriptedAuth {
        password: &'static str,
        logout_fails: bool,
        validate_result: Mutex<Result<ValidateResponse, StatusCode>>,
        login_gate: Option<Notify>,
        logout_gate: Option<Notify>,
        validate_gate: Option<Notify>,
        login_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        validate_calls: AtomicUsize,
    }

    impl ScriptedAuth {
        fn new(password: &'static str) -> Self {
            Self {
                password,
                logout_fails: false,
                validate_result: Mutex::new(Err(StatusCode::UNAUTHORIZED)),
                login_gate: None,
                logout_gate: None,
                validate_gate: None,
                login_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
                validate_calls: AtomicUsize::new(0),
            }
        }
    }

    async fn pass(gate: &Option<Notify>) {
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn release(gate: &Option<Notify>) {
        if let Some(gate) = gate {
            gate.notify_one();
        }
    }

    async fn wait_for_call(calls: &AtomicUsize) {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[async_trait]
    impl AuthApi for ScriptedAuth {
        async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            pass(&self.login_gate).await;
            if password != self.password {
                return Err(rejected(StatusCode::UNAUTHORIZED));
            }
            Ok(LoginResponse {
                username: username.to_string(),
                is_root: username == "root",
                is_admin: username == "root" || username == "admin",
                expires_at: None,
            })
        }

        async fn logout(&self) -> Result<(), ApiError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            pass(&self.logout_gate).await;
            if self.logout_fails {
                Err(rejected(StatusCode::BAD_GATEWAY))
            } else {
                Ok(())
            }
        }

        async fn validate(&self) -> Result<ValidateResponse, ApiError> {
            self.validate_calls.fetch_add(1, Ordering::SeqCst);
            pass(&self.validate_gate).await;
            self.validate_result.lock().clone().map_err(rejected)
        }
    }

    #[test]
    fn test_initial_state_is_loading() {
        let store = SessionStore::new(Arc::new(ScriptedAuth::new("secret")));
        let state = store.snapshot();
        assert_eq!(state.phase(), SessionPhase::Loading);
        assert!(!state.is_authenticated());
        assert!(!store.can_manage_all_shares());
    }

    #[tokio::test]
    async fn test_login_success_sets_identity() {
        let store = SessionStore::new(Arc::new(ScriptedAuth::new("secret")));
        assert!(store.login("admin", "secret").await);

        let state = store.snapshot();
        assert_eq!(state.phase(), SessionPhase::Authenticated);
        assert_eq!(state.username(), Some("admin"));
        assert!(store.is_admin());
        assert!(!store.is_root());
        assert!(store.can_manage_all_shares());
    }

    #[tokio::test]
    async fn test_rejected_login_stores_error() {
        let store = SessionStore::new(Arc::new(ScriptedAuth::new("secret")));
        assert!(!store.login("admin", "wrongpass").await);

        let state = store.snapshot();
        assert!(!state.is_authenticated());
        assert!(!state.is_loading());
        assert_eq!(state.error(), Some("API Error: 401 Unauthorized"));
        assert_eq!(state.phase(), SessionPhase::Failed);

        store.clear_error();
        let state = store.snapshot();
        assert_eq!(state.error(), None);
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_failed_login_after_success_signs_out() {
        let store = SessionStore::new(Arc::new(ScriptedAuth::new("secret")));
        assert!(store.login("root", "secret").await);
        assert!(!store.login("root", "nope").await);
        assert!(!store.snapshot().is_authenticated());
        assert!(!store.is_root());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let mut auth = ScriptedAuth::new("secret");
        auth.logout_fails = true;
        let store = SessionStore::new(Arc::new(auth));
        assert!(store.login("root", "secret").await);

        store.logout().await;
        let state = store.snapshot();
        assert!(!state.is_authenticated());
        assert_eq!(state.username(), None);
        assert!(!state.is_root() && !state.is_admin());
        assert_eq!(state.error(), None);
    }

    #[tokio::test]
    async fn test_validate_outcomes() {
        let auth = Arc::new(ScriptedAuth::new("secret"));
        let store = SessionStore::new(auth.clone());

        // Unreachable or rejecting server: signed out, no error shown
        store.validate().await;
        let state = store.snapshot();
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert_eq!(state.error(), None);

        *auth.validate_result.lock() = Ok(ValidateResponse {
            valid: true,
            username: Some("alice".to_string()),
            is_root: false,
            is_admin: true,
        });
        store.validate().await;
        let state = store.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.username(), Some("alice"));
        assert!(state.can_manage_all_shares());

        *auth.validate_result.lock() = Ok(ValidateResponse::default());
        store.validate().await;
        assert!(!store.snapshot().is_authenticated());
        assert_eq!(store.snapshot().username(), None);
    }

    #[tokio::test]
    async fn test_stale_validate_cannot_overwrite_newer_login() {
        let mut auth = ScriptedAuth::new("secret");
        auth.validate_gate = Some(Notify::new());
        *auth.validate_result.lock() = Ok(ValidateResponse {
            valid: true,
            username: Some("stale".to_string()),
            is_root: true,
            is_admin: true,
        });
        let auth = Arc::new(auth);
        let store = Arc::new(SessionStore::new(auth.clone()));

        let validating = {
            let store = store.clone();
            tokio::spawn(async move { store.validate().await })
        };
        wait_for_call(&auth.validate_calls).await;

        assert!(store.login("bob", "secret").await);
        release(&auth.validate_gate);
        validating.await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.username(), Some("bob"));
        assert!(!state.is_root());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_validate_during_logout_cannot_restore_session() {
        let mut auth = ScriptedAuth::new("secret");
        auth.logout_gate = Some(Notify::new());
        *auth.validate_result.lock() = Ok(ValidateResponse {
            valid: true,
            username: Some("root".to_string()),
            is_root: true,
            is_admin: true,
        });
        let auth = Arc::new(auth);
        let store = Arc::new(SessionStore::new(auth.clone()));
        assert!(store.login("root", "secret").await);

        let logging_out = {
            let store = store.clone();
            tokio::spawn(async move { store.logout().await })
        };
        wait_for_call(&auth.logout_calls).await;

        // Server still reports the old session while the logout is pending
        store.validate().await;
        assert!(!store.snapshot().is_authenticated());

        release(&auth.logout_gate);
        logging_out.await.unwrap();

        let state = store.snapshot();
        assert!(!state.is_authenticated());
        assert!(!state.is_root());
        assert_eq!(state.username(), None);
        assert_eq!(auth.validate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validate_during_login_keeps_login_result() {
        let mut auth = ScriptedAuth::new("secret");
        auth.login_gate = Some(Notify::new());
        let auth = Arc::new(auth);
        let store = Arc::new(SessionStore::new(auth.clone()));

        let logging_in = {
            let store = store.clone();
            tokio::spawn(async move { store.login("admin", "secret").await })
        };
        wait_for_call(&auth.login_calls).await;

        // Would sign out: the scripted server rejects validation
        store.validate().await;
        assert!(store.snapshot().is_loading());

        release(&auth.login_gate);
        assert!(logging_in.await.unwrap());

        let state = store.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.username(), Some("admin"));
        assert!(!state.is_loading());
        assert_eq!(auth.validate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validate_after_logout_runs_normally() {
        let auth = Arc::new(ScriptedAuth::new("secret"));
        let store = SessionStore::new(auth.clone());
        assert!(store.login("root", "secret").await);
        store.logout().await;

        store.validate().await;
        assert_eq!(auth.validate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.snapshot().phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let store = SessionStore::new(Arc::new(ScriptedAuth::new("secret")));
        let mut changes = store.subscribe();
        assert!(store.login("admin", "secret").await);
        assert!(changes.has_changed().unwrap());
        assert!(changes.borrow_and_update().is_authenticated());

        store.clear_error();
        assert!(!changes.has_changed().unwrap());
    }
}
