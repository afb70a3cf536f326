//! Chat completions endpoint - the tool-mediating entry point

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use toolgate_core::{Completion, ConversationRequest, GatewayError, Orchestrator};

use crate::error::AppError;
use crate::types::{completion_chunks, ChatCompletionRequest, ChatCompletionResponse};
use crate::AppState;

const SSE_CHANNEL_BUFFER: usize = 32;

pub async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)?;
    let stream = request.stream;
    let conversation = request.into_conversation()?;

    tracing::info!(
        messages = conversation.messages.len(),
        client_tools = conversation.tools.len(),
        confirmed = conversation.confirmed_tool_calls.len(),
        stream,
        "Chat completion request"
    );

    if stream {
        let sse = stream_completion(Arc::clone(&state.orchestrator), conversation);
        return Ok(sse.into_response());
    }

    // Dropping this future on client disconnect abandons the response;
    // tool tasks already spawned run to completion.
    let completion = state.orchestrator.run(conversation).await?;
    let created = chrono::Utc::now().timestamp();
    Ok(Json(ChatCompletionResponse::from_completion(&completion, created)).into_response())
}

fn stream_completion(
    orchestrator: Arc<Orchestrator>,
    conversation: ConversationRequest,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (sse_tx, sse_rx) = mpsc::channel::<Result<Event, Infallible>>(SSE_CHANNEL_BUFFER);

    tokio::spawn(async move {
        let outcome = tokio::select! {
            outcome = orchestrator.run(conversation) => outcome,
            _ = sse_tx.closed() => {
                tracing::info!("Client disconnected, abandoning streamed completion");
                return;
            }
        };
        send_outcome(&sse_tx, outcome).await;
    });

    // Keep-alive comments hold the connection open while tools run.
    Sse::new(ReceiverStream::new(sse_rx)).keep_alive(KeepAlive::default())
}

async fn send_outcome(
    sse_tx: &mpsc::Sender<Result<Event, Infallible>>,
    outcome: Result<Completion, GatewayError>,
) {
    match outcome {
        Ok(completion) => {
            let created = chrono::Utc::now().timestamp();
            for chunk in completion_chunks(&completion, created) {
                if !send_json(sse_tx, &chunk).await {
                    return;
                }
            }
        }
        Err(e) => {
            let body = AppError::from(e).body();
            match serde_json::to_value(&body) {
                Ok(value) => {
                    send_json(sse_tx, &value).await;
                }
                Err(e) => tracing::error!("Failed to serialize stream error: {}", e),
            }
        }
    }
    let _ = sse_tx.send(Ok(Event::default().data("[DONE]"))).await;
}

async fn send_json(
    sse_tx: &mpsc::Sender<Result<Event, Infallible>>,
    value: &serde_json::Value,
) -> bool {
    sse_tx
        .send(Ok(Event::default().data(value.to_string())))
        .await
        .is_ok()
}
