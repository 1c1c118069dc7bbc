/*!
Stub dashboard server for client tests

Runs an in-process axum server on an ephemeral port with the endpoints the
telemetry client talks to:
- `GET /api/events` : Server-Sent Events fed by [`StubServer::push_json`]
- `GET /api/ws` : WebSocket fed by the same pushes, closable on demand
- `POST /api/auth/login`, `POST /api/auth/logout`, `GET /api/auth/validate`
  with an `arcanas_session` cookie
*/

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const SESSION_COOKIE: &str = "arcanas_session";

const SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// How long a server-initiated close waits for the client's reply
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Account known to the stub
#[derive(Debug, Clone)]
pub struct StubUser {
    pub password: String,
    pub is_root: bool,
    pub is_admin: bool,
}

impl StubUser {
    pub fn new(password: &str, is_root: bool, is_admin: bool) -> Self {
        Self {
            password: password.to_string(),
            is_root,
            is_admin,
        }
    }
}

/// `root` / `rootpass`, `admin` / `adminpass`, `alice` / `alicepass`
pub fn default_users() -> HashMap<String, StubUser> {
    HashMap::from([
        ("root".to_string(), StubUser::new("rootpass", true, true)),
        ("admin".to_string(), StubUser::new("adminpass", false, true)),
        ("alice".to_string(), StubUser::new("alicepass", false, false)),
    ])
}

#[derive(Debug, Clone)]
enum StubFrame {
    Data { id: u64, payload: String },
    Named { event: String, data: String },
    Close { code: u16, reason: String },
}

#[derive(Clone)]
struct StubState {
    sse_frames: broadcast::Sender<StubFrame>,
    ws_frames: broadcast::Sender<StubFrame>,
    users: Arc<HashMap<String, StubUser>>,
    sessions: Arc<Mutex<HashMap<String, String>>>,
    ws_received: Arc<Mutex<Vec<String>>>,
    last_event_ids: Arc<Mutex<Vec<Option<String>>>>,
    sse_connections: Arc<AtomicUsize>,
    ws_connections: Arc<AtomicUsize>,
    ws_close_replies: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

/// Handle to a running stub server; the server stops when it is dropped
pub struct StubServer {
    addr: SocketAddr,
    state: StubState,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> Result<Self> {
        Self::start_with_users(default_users()).await
    }

    pub async fn start_with_users(users: HashMap<String, StubUser>) -> Result<Self> {
        let (sse_frames, _) = broadcast::channel(256);
        let (ws_frames, _) = broadcast::channel(256);
        let state = StubState {
            sse_frames,
            ws_frames,
            users: Arc::new(users),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ws_received: Arc::new(Mutex::new(Vec::new())),
            last_event_ids: Arc::new(Mutex::new(Vec::new())),
            sse_connections: Arc::new(AtomicUsize::new(0)),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            ws_close_replies: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(state.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                log::error!("Stub server stopped: {}", e);
            }
        });

        log::info!("🧪 [STUB] Dashboard stub listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// API base URL, e.g. `http://127.0.0.1:40123/api`
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Broadcast a raw payload to every SSE and WebSocket client.
    /// Returns the number of clients it reached.
    pub fn push_raw(&self, payload: impl Into<String>) -> usize {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = StubFrame::Data { id, payload: payload.into() };
        self.broadcast(frame)
    }

    pub fn push_json(&self, payload: &Value) -> usize {
        self.push_raw(payload.to_string())
    }

    /// SSE event with a custom `event:` name (WebSocket clients ignore it)
    pub fn push_named(&self, event: &str, data: &str) -> usize {
        self.broadcast(StubFrame::Named {
            event: event.to_string(),
            data: data.to_string(),
        })
    }

    /// Close every open stream from the server side.
    /// WebSocket clients get a close frame with `code` and `reason`.
    pub fn close_streams(&self, code: u16, reason: &str) -> usize {
        log::info!("🔌 [STUB] Closing streams ({} {})", code, reason);
        self.broadcast(StubFrame::Close {
            code,
            reason: reason.to_string(),
        })
    }

    /// SSE clients currently subscribed to pushes
    pub fn sse_subscribers(&self) -> usize {
        self.state.sse_frames.receiver_count()
    }

    /// WebSocket clients currently subscribed to pushes
    pub fn ws_subscribers(&self) -> usize {
        self.state.ws_frames.receiver_count()
    }

    /// SSE connections accepted since start
    pub fn sse_connections(&self) -> usize {
        self.state.sse_connections.load(Ordering::SeqCst)
    }

    /// WebSocket connections accepted since start
    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Server-initiated WebSocket closes the client answered with its own close frame
    pub fn ws_close_replies(&self) -> usize {
        self.state.ws_close_replies.load(Ordering::SeqCst)
    }

    /// `Last-Event-ID` header of each SSE connection, in connection order
    pub fn last_event_ids(&self) -> Vec<Option<String>> {
        self.state.last_event_ids.lock().clone()
    }

    /// Text frames sent by WebSocket clients
    pub fn ws_received(&self) -> Vec<String> {
        self.state.ws_received.lock().clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.sessions.lock().len()
    }

    fn broadcast(&self, frame: StubFrame) -> usize {
        let sse = self.state.sse_frames.send(frame.clone()).unwrap_or(0);
        let ws = self.state.ws_frames.send(frame).unwrap_or(0);
        sse + ws
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn build_router(state: StubState) -> Router {
    Router::new()
        .route("/api/events", get(events))
        .route("/api/ws", get(websocket))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/validate", get(validate))
        .with_state(state)
}

async fn events(
    State(state): State<StubState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.last_event_ids.lock().push(last_event_id);
    state.sse_connections.fetch_add(1, Ordering::SeqCst);

    let frames = state.sse_frames.subscribe();
    let stream = stream::unfold(frames, |mut frames| async move {
        loop {
            let event = match frames.recv().await {
                Ok(StubFrame::Data { id, payload }) => Event::default().id(id.to_string()).data(payload),
                Ok(StubFrame::Named { event, data }) => Event::default().event(event).data(data),
                Ok(StubFrame::Close { .. }) | Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };
            return Some((Ok(event), frames));
        }
    });
    Sse::new(stream)
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<StubState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: StubState) {
    let mut frames = state.ws_frames.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(StubFrame::Data { payload, .. }) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Ok(StubFrame::Named { .. }) => {}
                Ok(StubFrame::Close { code, reason }) => {
                    let close = CloseFrame { code, reason: reason.into() };
                    if let Err(e) = socket.send(Message::Close(Some(close))).await {
                        log::warn!("[STUB] Close frame not delivered: {}", e);
                        break;
                    }
                    await_close_reply(&mut socket, &state).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => state.ws_received.lock().push(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn await_close_reply(socket: &mut WebSocket, state: &StubState) {
    let reply = tokio::time::timeout(CLOSE_REPLY_TIMEOUT, async {
        loop {
            match socket.recv().await {
                Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return false,
            }
        }
    })
    .await;

    match reply {
        Ok(true) => {
            state.ws_close_replies.fetch_add(1, Ordering::SeqCst);
        }
        Ok(false) => log::debug!("[STUB] Client dropped the connection without a close reply"),
        Err(_) => log::warn!("[STUB] No close reply within {:?}", CLOSE_REPLY_TIMEOUT),
    }
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(State(state): State<StubState>, Json(body): Json<LoginBody>) -> Response {
    let Some(user) = state
        .users
        .get(&body.username)
        .filter(|user| user.password == body.password)
    else {
        log::info!("🔒 [STUB] Rejected login for {}", body.username);
        return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
    };

    let token = format!("stub-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    state.sessions.lock().insert(token.clone(), body.username.clone());

    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token, SESSION_MAX_AGE_SECS
    );
    let body = json!({
        "username": body.username,
        "is_root": user.is_root,
        "is_admin": user.is_admin,
        "expires_at": chrono::Utc::now().timestamp() + SESSION_MAX_AGE_SECS,
    });
    ([(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

async fn logout(State(state): State<StubState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.lock().remove(&token);
    }
    let cookie = format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", SESSION_COOKIE);
    ([(header::SET_COOKIE, cookie)], Json(json!({"status": "logged out"}))).into_response()
}

async fn validate(State(state): State<StubState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
    };
    let Some(username) = state.sessions.lock().get(&token).cloned() else {
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    };

    let user = state.users.get(&username);
    Json(json!({
        "username": username,
        "is_root": user.map(|u| u.is_root).unwrap_or(false),
        "is_admin": user.map(|u| u.is_admin).unwrap_or(false),
        "valid": true,
    }))
    .into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
