use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::auth;
use super::protocol::{self, Connection, ServerEvent};
use super::rooms::Rooms;
use crate::audit::AuditLog;
use crate::bank::QuestionBank;
use crate::config::PhishermanConfig;
use crate::store::{SessionStore, StoreSettings};

/// Shared state handed to every connection. One store, one set of rooms.
pub struct AppState {
    pub token: Option<String>,
    pub config: PhishermanConfig,
    pub bank: Arc<QuestionBank>,
    pub store: Mutex<SessionStore>,
    pub rooms: RwLock<Rooms>,
    pub audit: AuditLog,
}

impl AppState {
    pub fn new(config: PhishermanConfig, token: Option<String>) -> Self {
        let bank = Arc::new(QuestionBank::builtin());
        let store = SessionStore::new(Arc::clone(&bank), StoreSettings::from(&config.quiz));
        let audit = AuditLog::from_config(&config.audit);
        Self::with_parts(config, token, bank, store, audit)
    }

    pub fn with_parts(
        config: PhishermanConfig,
        token: Option<String>,
        bank: Arc<QuestionBank>,
        store: SessionStore,
        audit: AuditLog,
    ) -> Self {
        Self {
            token,
            config,
            bank,
            store: Mutex::new(store),
            rooms: RwLock::new(Rooms::new()),
            audit,
        }
    }
}

pub async fn run(config: PhishermanConfig, token: Option<String>) -> anyhow::Result<()> {
    let is_loopback = config.gateway.is_loopback();

    if !is_loopback && token.is_none() {
        anyhow::bail!(
            "Auth token required when binding to non-loopback address. \
             Set --token or PHISHERMAN_TOKEN env var."
        );
    }

    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let state = Arc::new(AppState::new(config, token));
    info!(
        topics = state.bank.list_topics().len(),
        max_questions = state.config.quiz.max_questions,
        ttl_secs = state.config.quiz.session_ttl_secs,
        audit = state.audit.is_enabled(),
        "quiz engine configured"
    );

    let app = router(state)?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("phisherman gateway listening on {addr}");
    if is_loopback {
        info!("bound to loopback, local access only");
    } else {
        warn!("bound to {addr}, ensure auth token is set");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the HTTP router: `/quiz` WebSocket, `/health`, `/topics`.
pub fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let cors = match state.config.gateway.cors_origin.as_deref() {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("invalid cors_origin '{origin}': {e}"))?;
            Some(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        }
        None => None,
    };

    let app = Router::new()
        .route("/quiz", get(ws_handler))
        .route("/health", get(health))
        .route("/topics", get(topics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    Ok(match cors {
        Some(cors) => app.layer(cors),
        None => app,
    })
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicSummary {
    id: String,
    title: String,
    bullets: Vec<String>,
    question_count: usize,
}

async fn topics(State(state): State<Arc<AppState>>) -> Json<Vec<TopicSummary>> {
    Json(
        state
            .bank
            .topics()
            .iter()
            .map(|t| TopicSummary {
                id: t.id.clone(),
                title: t.title.clone(),
                bullets: t.bullets.clone(),
                question_count: t.questions.len(),
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !auth::verify_token(params.token.as_deref(), state.token.as_deref()) {
        warn!("rejected /quiz upgrade: bad or missing token");
        return (StatusCode::UNAUTHORIZED, "auth_failed").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(64);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("failed to serialize outbound event: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let conn = Connection::new(uuid::Uuid::new_v4().to_string(), tx);
    info!(conn = %conn.id, "client connected to /quiz");

    let _ = conn
        .outbox
        .send(ServerEvent::Connected {
            namespace: "/quiz".into(),
            sid: conn.id.clone(),
        })
        .await;

    // Frames from one client are handled strictly in arrival order.
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => protocol::handle_frame(&text, &conn, &state).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    let left = state.rooms.write().await.leave_all(&conn.id);
    info!(conn = %conn.id, rooms_left = left, "client disconnected from /quiz");

    drop(conn);
    let _ = writer.await;
}
