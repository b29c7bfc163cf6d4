//! HTTP + WebSocket service.
//!
//! REST endpoints cover one-shot chat and session inspection; the WebSocket
//! endpoint streams live events (`session_info`, `history`, `message`,
//! `typing`) for a session. Every query, regardless of transport, runs
//! through [`process_query`], which owns the transcript/broadcast ordering:
//! the user message is recorded and broadcast, typing starts, generation
//! runs, typing stops, and only then is the assistant message recorded and
//! broadcast. A generation failure still produces an assistant message, with
//! `error: true` metadata.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::broadcast::ConnectionBroadcaster;
use crate::config::DocentConfig;
use crate::error::SessionError;
use crate::events::{ClientEvent, ServerEvent};
use crate::orchestrator::QueryOrchestrator;
use crate::session::{Message, Role, SessionInfo, SessionRegistry};

/// Shared state behind every handler.
pub struct AppContext {
    pub config: DocentConfig,
    pub registry: SessionRegistry,
    pub broadcaster: ConnectionBroadcaster,
    pub orchestrator: QueryOrchestrator,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:session_id", get(session_info))
        .route("/api/sessions/:session_id/history", get(session_history))
        .route("/api/health", get(health))
        .route("/ws/:session_id", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind, start the session sweeper, and serve until the process exits.
pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    spawn_sweeper(Arc::clone(&ctx));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

fn spawn_sweeper(ctx: Arc<AppContext>) {
    let max_age = chrono::Duration::seconds(ctx.config.session_max_age_secs as i64);
    let interval = std::time::Duration::from_secs(ctx.config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = ctx.registry.sweep(max_age).await;
            for id in &removed {
                ctx.broadcaster.detach_session(id).await;
            }
            if !removed.is_empty() {
                info!(count = removed.len(), "swept inactive sessions");
            }
        }
    });
}

/// Run one query against a session, keeping transcript and broadcast in
/// lockstep. Returns the assistant message (which may be an error message).
pub async fn process_query(
    ctx: &AppContext,
    session_id: &str,
    query: &str,
) -> Result<Message, SessionError> {
    let user_message = ctx
        .registry
        .append(session_id, Role::User, query.to_string(), Map::new())
        .await?;
    ctx.broadcaster
        .broadcast(session_id, ServerEvent::Message {
            message: user_message,
        })
        .await;

    ctx.broadcaster
        .broadcast(session_id, ServerEvent::Typing { is_typing: true })
        .await;

    let (content, metadata) = match ctx.orchestrator.answer(query).await {
        Ok(answer) => {
            let mut metadata = Map::new();
            metadata.insert("model".to_string(), Value::from(ctx.orchestrator.model()));
            metadata.insert(
                "top_k".to_string(),
                Value::from(ctx.orchestrator.top_k() as u64),
            );
            (answer, metadata)
        }
        Err(err) => {
            warn!(session_id, error = %err, "query failed");
            let mut metadata = Map::new();
            metadata.insert("error".to_string(), Value::from(true));
            (format!("Error processing query: {err}"), metadata)
        }
    };

    // Typing must stop exactly once, even if the append below fails.
    ctx.broadcaster
        .broadcast(session_id, ServerEvent::Typing { is_typing: false })
        .await;

    let assistant_message = ctx
        .registry
        .append(session_id, Role::Assistant, content, metadata)
        .await?;
    ctx.broadcaster
        .broadcast(session_id, ServerEvent::Message {
            message: assistant_message.clone(),
        })
        .await;
    Ok(assistant_message)
}

async fn chat(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let session_id = match request.session_id {
        Some(id) if ctx.registry.contains(&id).await => id,
        // Unknown or absent id: start a fresh session.
        _ => ctx.registry.create().await,
    };

    let message = process_query(&ctx, &session_id, &request.query)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let response = if message.is_error() {
        ChatResponse {
            success: false,
            session_id,
            error: Some(message.content.clone()),
            message: Some(message),
        }
    } else {
        ChatResponse {
            success: true,
            session_id,
            message: Some(message),
            error: None,
        }
    };
    Ok(Json(response))
}

async fn create_session(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let session_id = ctx.registry.create().await;
    Json(json!({"session_id": session_id}))
}

async fn session_info(
    State(ctx): State<Arc<AppContext>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    ctx.registry
        .info(&session_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn session_history(
    State(ctx): State<Arc<AppContext>>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    ctx.registry
        .history(&session_id, params.limit)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "chatbot_name": ctx.config.chatbot_name,
        "model": ctx.orchestrator.model(),
        "sessions": ctx.registry.session_count().await,
    }))
}

async fn ws_upgrade(
    State(ctx): State<Arc<AppContext>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(ctx, session_id, socket))
}

async fn handle_socket(ctx: Arc<AppContext>, session_id: String, socket: WebSocket) {
    // The URL-supplied id is adopted so a client can reconnect to its session.
    ctx.registry.ensure(&session_id).await;

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = ctx.broadcaster.attach(&session_id, tx.clone()).await;

    if let Some(info) = ctx.registry.info(&session_id).await {
        let _ = tx.send(ServerEvent::SessionInfo { data: info });
    }
    if let Ok(history) = ctx.registry.history(&session_id, None).await {
        let _ = tx.send(ServerEvent::History { data: history });
    }

    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                debug!(session_id, error = %err, "ignoring unparseable client event");
                continue;
            }
        };
        let ClientEvent::Chat { message } = event;
        let query = message.trim().to_string();
        if query.is_empty() {
            continue;
        }
        // Queries run detached so the receive loop keeps draining the socket.
        let ctx = Arc::clone(&ctx);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = process_query(&ctx, &session_id, &query).await {
                warn!(session_id, error = %err, "websocket query failed");
            }
        });
    }

    ctx.broadcaster.detach(&session_id, connection_id).await;
    forward.abort();
    debug!(session_id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::document::Document;
    use crate::embedding::testing::HashEmbedder;
    use crate::index::IndexCache;
    use crate::retriever::Retriever;
    use crate::synthesizer::{OllamaClient, Synthesizer};
    use httpmock::prelude::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// Context over a tiny fixture corpus, with generation pointed at a mock
    /// Ollama server. The TempDir must outlive the context.
    fn test_context(backend_url: &str) -> (Arc<AppContext>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = DocentConfig {
            backend_base_url: backend_url.to_string(),
            model: "test-model".to_string(),
            top_k: 2,
            ..DocentConfig::default()
        };

        let documents = vec![
            doc("Exampleville was founded in 1873 beside the Copper River. \
                 The town is known for its clockwork museum."),
            doc("The annual lantern festival in Exampleville takes place in \
                 October and draws thousands of visitors."),
        ];
        let embedder = Arc::new(HashEmbedder);
        let index = IndexCache::new(
            &dir.path().join("index"),
            Chunker::new(200, 20),
            embedder.clone(),
        )
        .load_or_build(&documents)
        .unwrap();

        let client = OllamaClient::new(&config).unwrap();
        let orchestrator = QueryOrchestrator::new(
            Arc::new(index),
            Retriever::new(embedder, config.top_k),
            Synthesizer::new(client, "You are a guide.".to_string()),
        );

        let ctx = Arc::new(AppContext {
            config,
            registry: SessionRegistry::new(),
            broadcaster: ConnectionBroadcaster::new(),
            orchestrator,
        });
        (ctx, dir)
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        json!({"message": {"role": "assistant", "content": content}, "done": true})
    }

    #[tokio::test]
    async fn test_query_answers_from_the_corpus() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_includes("Exampleville");
                then.status(200)
                    .json_body(chat_reply("Exampleville was founded in 1873."));
            })
            .await;

        let (ctx, _dir) = test_context(&server.base_url());
        let session_id = ctx.registry.create().await;
        let message = process_query(&ctx, &session_id, "When was Exampleville founded?")
            .await
            .unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.contains("1873"));
        assert!(!message.is_error());
        assert_eq!(
            message.metadata.get("model").and_then(Value::as_str),
            Some("test-model")
        );
        assert_eq!(
            message.metadata.get("top_k").and_then(Value::as_u64),
            Some(2)
        );

        let history = ctx.registry.history(&session_id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_events_arrive_in_protocol_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(chat_reply("An answer."));
            })
            .await;

        let (ctx, _dir) = test_context(&server.base_url());
        let session_id = ctx.registry.create().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        ctx.broadcaster.attach(&session_id, tx).await;

        process_query(&ctx, &session_id, "anything").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(
            matches!(&first, ServerEvent::Message { message } if message.role == Role::User)
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Typing { is_typing: true }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Typing { is_typing: false }
        ));
        let last = rx.recv().await.unwrap();
        assert!(
            matches!(&last, ServerEvent::Message { message } if message.role == Role::Assistant)
        );
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_an_error_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(500);
            })
            .await;

        let (ctx, _dir) = test_context(&server.base_url());
        let session_id = ctx.registry.create().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        ctx.broadcaster.attach(&session_id, tx).await;

        let message = process_query(&ctx, &session_id, "doomed query")
            .await
            .unwrap();

        assert!(message.is_error());
        assert!(message.content.starts_with("Error processing query:"));

        // The transcript still records both turns, and typing stopped.
        let history = ctx.registry.history(&session_id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        let mut saw_typing_stop = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::Typing { is_typing: false }) {
                saw_typing_stop = true;
            }
        }
        assert!(saw_typing_stop);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_interleave() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(chat_reply("ok"));
            })
            .await;

        let (ctx, _dir) = test_context(&server.base_url());

        let mut session_ids = Vec::new();
        for _ in 0..50 {
            session_ids.push(ctx.registry.create().await);
        }
        let tasks = session_ids.iter().enumerate().map(|(i, id)| {
            let ctx = Arc::clone(&ctx);
            let id = id.clone();
            async move { process_query(&ctx, &id, &format!("question {i}")).await }
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        for (i, id) in session_ids.iter().enumerate() {
            let history = ctx.registry.history(id, None).await.unwrap();
            assert_eq!(history.len(), 2, "session {id} transcript corrupted");
            assert_eq!(history[0].content, format!("question {i}"));
            assert_eq!(history[1].role, Role::Assistant);
        }
    }

    #[tokio::test]
    async fn test_rest_chat_roundtrip_over_http() {
        let backend = MockServer::start_async().await;
        backend
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(chat_reply("The festival is in October."));
            })
            .await;

        let (ctx, _dir) = test_context(&backend.base_url());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(ctx);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = reqwest::Client::new();
        let base = format!("http://{addr}");

        // Health first.
        let health: Value = http
            .get(format!("{base}/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        // First chat creates a session.
        let first: Value = http
            .post(format!("{base}/api/chat"))
            .json(&json!({"query": "When is the lantern festival?"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(first["success"], true);
        let session_id = first["session_id"].as_str().unwrap().to_string();
        assert!(first["message"]["content"]
            .as_str()
            .unwrap()
            .contains("October"));

        // Second chat reuses it; history shows all four messages.
        let second: Value = http
            .post(format!("{base}/api/chat"))
            .json(&json!({"query": "Tell me more.", "session_id": session_id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["session_id"].as_str().unwrap(), session_id);

        let history: Value = http
            .get(format!("{base}/api/sessions/{session_id}/history"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.as_array().unwrap().len(), 4);

        // Unknown session id on chat starts a new session rather than 404ing.
        let third: Value = http
            .post(format!("{base}/api/chat"))
            .json(&json!({"query": "hi", "session_id": "no-such-session"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_ne!(third["session_id"].as_str().unwrap(), "no-such-session");

        // Session info for a missing id is 404.
        let missing = http
            .get(format!("{base}/api/sessions/definitely-missing"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
