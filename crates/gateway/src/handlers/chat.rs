//! Chat handlers

use axum::{
    extract::{Path, State},
    Json,
};
use doctalk_common::{
    chain::{ChainOptions, ConversationalRetrievalChain},
    errors::{AppError, Result},
    llm::ChatMessage,
    retrieval::VectorRetriever,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,
}

/// Chat response
#[derive(Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub generated_question: String,
    pub sources: Vec<SourceItem>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SourceItem {
    pub chunk_index: usize,
    pub source: String,
    pub content: String,
    pub relevance: f32,
}

/// Ask a question about the session's document
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("question".to_string()),
    })?;

    let handle = state.sessions.get(session_id).await?;

    // One question at a time per session; turns must land in order
    let _work = handle.begin_work().await;
    let (index, mut memory) = {
        let session = handle.lock().await;
        (session.require_index()?, session.memory.clone())
    };

    let retriever = VectorRetriever::new(index, state.embedder.clone(), state.config.retrieval.top_k)
        .with_score_threshold(state.config.retrieval.score_threshold);
    let chain = ConversationalRetrievalChain::new(
        state.llm.clone(),
        Arc::new(retriever),
        ChainOptions::from_config(&state.config.retrieval, &state.config.llm),
    );

    let response = chain.ask(&mut memory, &request.question).await?;
    let processing_time_ms = start.elapsed().as_millis() as u64;

    let turns = memory.turn_count();
    handle.lock().await.memory = memory;

    tracing::info!(
        session_id = %session_id,
        sources = response.sources.len(),
        turns,
        latency_ms = processing_time_ms,
        "Question answered"
    );

    Ok(Json(ChatResponse {
        answer: response.answer,
        generated_question: response.generated_question,
        sources: response
            .sources
            .into_iter()
            .map(|s| SourceItem {
                chunk_index: s.chunk_index,
                source: s.source,
                content: s.content,
                relevance: s.relevance,
            })
            .collect(),
        processing_time_ms,
    }))
}

/// Transcript of the session, oldest first
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>> {
    let handle = state.sessions.get(session_id).await?;
    let session = handle.lock().await;
    Ok(Json(session.memory.messages().to_vec()))
}

#[cfg(test)]
mod tests {
    use crate::testing::{json_body, TestApp};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use async_trait::async_trait;
    use doctalk_common::chain::CombineStrategy;
    use doctalk_common::errors::Result;
    use doctalk_common::llm::{ChatMessage, ChatModel, CompletionOptions, MockChatModel};
    use doctalk_ingestion::testing::build_pdf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Answers only once released, so a question can be held in flight
    #[derive(Default)]
    struct GatedChatModel {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatModel for GatedChatModel {
        async fn complete(&self, _messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("Thirty days.".to_string())
        }

        fn model_name(&self) -> &str {
            "gated"
        }
    }

    async fn indexed_session(app: &TestApp) -> String {
        let id = app.create_session().await;
        let pdf = build_pdf(&[
            "Refunds are accepted within thirty days of purchase.",
            "Sale items can be returned within fourteen days.",
        ]);
        let response = app.upload(&id, "policy.pdf", &pdf).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        id
    }

    fn stuff_chain(app: &mut TestApp) {
        let mut config = (*app.state.config).clone();
        config.retrieval.chain_type = CombineStrategy::Stuff;
        app.state.config = Arc::new(config);
    }

    async fn history(app: &TestApp, id: &str) -> serde_json::Value {
        let response = app
            .send(
                Request::get(format!("/v1/sessions/{}/history", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    #[tokio::test]
    async fn test_question_before_upload_conflicts() {
        let app = TestApp::new(MockChatModel::new());
        let id = app.create_session().await;

        let response = app.ask(&id, "What is the refund window?").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(app.llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chat_records_history() {
        let mut app = TestApp::new(MockChatModel::new());
        stuff_chain(&mut app);
        let id = indexed_session(&app).await;

        let response = app.ask(&id, "What is the refund window?").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["generated_question"], "What is the refund window?");
        assert!(!body["sources"].as_array().unwrap().is_empty());
        assert!(body["answer"].as_str().unwrap().starts_with("[mock]"));

        let transcript = history(&app, &id).await;
        let transcript = transcript.as_array().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0]["role"], "user");
        assert_eq!(transcript[0]["content"], "What is the refund window?");
        assert_eq!(transcript[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_follow_up_is_condensed() {
        let mut app = TestApp::new(MockChatModel::with_responses(["Thirty days."]));
        stuff_chain(&mut app);
        let id = indexed_session(&app).await;

        let first = app.ask(&id, "What is the refund window?").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await["answer"], "Thirty days.");

        let second = app.ask(&id, "And for sale items?").await;
        assert_eq!(second.status(), StatusCode::OK);

        // second turn: condense, then answer
        let calls = app.llm.calls();
        assert_eq!(calls.len(), 3);
        let condense = &calls[1][0].content;
        assert!(condense.contains("Follow-up question: And for sale items?"));
        assert!(condense.contains("Human: What is the refund window?"));
        assert!(condense.contains("Assistant: Thirty days."));
    }

    #[tokio::test]
    async fn test_map_reduce_answer() {
        let app = TestApp::new(MockChatModel::new());
        let id = indexed_session(&app).await;

        let response = app.ask(&id, "What is the refund window?").await;
        assert_eq!(response.status(), StatusCode::OK);
        let sources = json_body(response).await["sources"].as_array().unwrap().len();

        // one map call per retrieved chunk plus the combine call
        assert_eq!(app.llm.calls().len(), sources + 1);
    }

    #[tokio::test]
    async fn test_question_validation() {
        let app = TestApp::new(MockChatModel::new());
        let id = indexed_session(&app).await;

        let response = app.ask(&id, "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.ask(&id, &"x".repeat(4001)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(history(&app, &id).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let app = TestApp::new(MockChatModel::new());
        let response = app.ask(&uuid::Uuid::new_v4().to_string(), "Hello?").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_answer() {
        let model = Arc::new(GatedChatModel::default());
        let mut app = TestApp::with_chat_model(model.clone());
        stuff_chain(&mut app);
        let id = indexed_session(&app).await;
        let app = Arc::new(app);

        let question = tokio::spawn({
            let app = app.clone();
            let id = id.clone();
            async move { app.ask(&id, "What is the refund window?").await.status() }
        });
        model.entered.notified().await;

        let transcript = tokio::time::timeout(Duration::from_secs(5), history(&app, &id))
            .await
            .expect("history queued behind the question");
        assert_eq!(transcript.as_array().unwrap().len(), 0);

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            app.send(
                Request::get(format!("/v1/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            ),
        )
        .await
        .expect("session lookup queued behind the question");
        assert_eq!(session.status(), StatusCode::OK);

        model.release.notify_one();
        assert_eq!(question.await.unwrap(), StatusCode::OK);
        assert_eq!(history(&app, &id).await.as_array().unwrap().len(), 2);
    }
}
