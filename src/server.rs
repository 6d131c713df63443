//! HTTP surface: the streaming chat gateway and a catalog listing.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::dispatch::registry::{Capability, ModelDescriptor};
use crate::error::SwitchboardError;
use crate::messages::ChatRequest;
use crate::orchestrator::Orchestrator;

/// Shared state available to all request handlers.
#[derive(Clone)]
pub struct Gateway {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub reasoning: bool,
    pub default: bool,
}

impl ModelInfo {
    fn from_descriptor(descriptor: &ModelDescriptor, default_model: &str) -> Self {
        Self {
            id: descriptor.id.clone(),
            provider: descriptor.provider.as_str().to_string(),
            reasoning: descriptor.has(Capability::Reasoning),
            default: descriptor.id == default_model,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: Gateway) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/models", get(list_models))
        .with_state(state)
}

/// Stream a chat completion as server-sent events.
///
/// Each frame carries an event name (`status` or `token`) and a JSON
/// `StreamEvent`. Closing the connection cancels the provider call.
async fn chat(State(state): State<Gateway>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(SwitchboardError::InvalidRequest(format!(
                "malformed body: {e}"
            )));
        }
    };

    let cancel = CancellationToken::new();
    let stream = match state.orchestrator.start(request, cancel.clone()).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };

    // Fires when hyper drops the body, i.e. when the client goes away.
    let guard = cancel.drop_guard();
    let (mut events, _task) = stream.into_parts();

    let frames = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.recv().await {
            yield Event::default().event(event.kind()).json_data(&event);
        }
    };

    Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn list_models(State(state): State<Gateway>) -> Json<ListModelsResponse> {
    let registry = state.orchestrator.registry();
    let default_model = registry.default_model();
    Json(ListModelsResponse {
        models: registry
            .list_models()
            .into_iter()
            .map(|d| ModelInfo::from_descriptor(d, default_model))
            .collect(),
    })
}

fn error_response(err: SwitchboardError) -> Response {
    let status = match &err {
        SwitchboardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SwitchboardError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(%status, "chat request rejected: {err}");
    (
        status,
        Json(ErrorBody {
            error: err.user_message(),
        }),
    )
        .into_response()
}

/// Handle returned by [`serve`]: holds the bound port and shutdown trigger.
pub struct ServeHandle {
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<tokio::task::JoinHandle<Result<(), std::io::Error>>>,
}

impl ServeHandle {
    /// Trigger graceful shutdown and wait for the server to stop.
    pub async fn shutdown(mut self) -> Result<(), std::io::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.await.map_err(std::io::Error::other)??;
        }
        Ok(())
    }
}

/// Bind `bind` and serve the gateway in a spawned task.
pub async fn serve(bind: &str, state: Gateway) -> Result<ServeHandle, std::io::Error> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let port = listener.local_addr()?.port();
    tracing::info!("gateway listening on {bind} (port {port})");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("received shutdown signal");
            })
            .await
    });

    Ok(ServeHandle {
        port,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}
