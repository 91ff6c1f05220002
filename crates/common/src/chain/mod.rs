//! Conversational retrieval chain
//!
//! Answers a question about an indexed document:
//! 1. condense the follow-up with the chat history into a standalone question
//! 2. retrieve the closest chunks
//! 3. combine them into an answer (map-reduce or stuff)
//! 4. append the turn to conversational memory

mod prompts;

use crate::config::{LlmConfig, RetrievalConfig};
use crate::errors::{AppError, Result};
use crate::llm::{ChatMessage, ChatModel, CompletionOptions};
use crate::memory::ConversationMemory;
use crate::metrics;
use crate::retrieval::{RetrievedChunk, Retriever};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How retrieved chunks are turned into an answer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CombineStrategy {
    /// Put every chunk into one prompt
    Stuff,
    /// Extract from each chunk separately, then combine the extracts
    #[default]
    MapReduce,
}

impl CombineStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombineStrategy::Stuff => "stuff",
            CombineStrategy::MapReduce => "map_reduce",
        }
    }
}

/// Chain options
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub combine: CombineStrategy,

    /// Combine with the standalone question instead of the raw follow-up
    pub rephrase_question: bool,

    /// Token budget for the extracts fed to the final combine call
    pub token_max: usize,

    /// Upper bound on collapse passes when extracts exceed `token_max`
    pub max_collapse_rounds: usize,

    /// Answer returned without calling the model when nothing was retrieved
    pub response_if_no_docs_found: Option<String>,

    /// Log prompts at info instead of debug
    pub verbose: bool,

    pub completion: CompletionOptions,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            combine: CombineStrategy::MapReduce,
            rephrase_question: true,
            token_max: 4000,
            max_collapse_rounds: 3,
            response_if_no_docs_found: None,
            verbose: false,
            completion: CompletionOptions::default(),
        }
    }
}

impl ChainOptions {
    pub fn from_config(retrieval: &RetrievalConfig, llm: &LlmConfig) -> Self {
        Self {
            combine: retrieval.chain_type,
            rephrase_question: retrieval.rephrase_question,
            token_max: retrieval.token_max,
            response_if_no_docs_found: retrieval.response_if_no_docs_found.clone(),
            verbose: retrieval.verbose,
            completion: CompletionOptions::from(llm),
            ..Self::default()
        }
    }
}

/// Answer to one question
#[derive(Debug, Clone, Serialize)]
pub struct ChainResponse {
    pub answer: String,

    /// The question as asked
    pub question: String,

    /// The standalone question used for retrieval
    pub generated_question: String,

    /// Chunks the answer was conditioned on
    pub sources: Vec<RetrievedChunk>,
}

/// Conversational retrieval chain
pub struct ConversationalRetrievalChain {
    llm: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    options: ChainOptions,
}

impl ConversationalRetrievalChain {
    pub fn new(llm: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>, options: ChainOptions) -> Self {
        Self {
            llm,
            retriever,
            options,
        }
    }

    /// Answer `question` in the context of `memory`.
    ///
    /// The turn is saved to memory only when an answer was produced.
    pub async fn ask(&self, memory: &mut ConversationMemory, question: &str) -> Result<ChainResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be empty".to_string(),
                field: Some("question".to_string()),
            });
        }

        let generated_question = if memory.is_empty() {
            question.to_string()
        } else {
            let prompt = prompts::condense_question(&memory.buffer_string(), question);
            let standalone = self.call("condense", prompt).await?;
            let standalone = standalone.trim();
            if standalone.is_empty() {
                question.to_string()
            } else {
                standalone.to_string()
            }
        };

        let sources = self.retriever.retrieve(&generated_question).await?;

        let answer_question = if self.options.rephrase_question {
            generated_question.as_str()
        } else {
            question
        };

        let answer = match (&self.options.response_if_no_docs_found, sources.is_empty()) {
            (Some(fixed), true) => fixed.clone(),
            _ => match self.options.combine {
                CombineStrategy::Stuff => self.stuff(&sources, answer_question).await?,
                CombineStrategy::MapReduce => self.map_reduce(&sources, answer_question).await?,
            },
        };

        memory.save_turn(question, answer.clone());
        metrics::record_chat_turn(self.options.combine.as_str(), sources.len());

        info!(
            chain_type = self.options.combine.as_str(),
            retrieved = sources.len(),
            rephrased = generated_question != question,
            turns = memory.turn_count(),
            "Question answered"
        );

        Ok(ChainResponse {
            answer,
            question: question.to_string(),
            generated_question,
            sources,
        })
    }

    async fn stuff(&self, sources: &[RetrievedChunk], question: &str) -> Result<String> {
        let context = sources
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.call("stuff", prompts::stuff_context(&context, question)).await
    }

    async fn map_reduce(&self, sources: &[RetrievedChunk], question: &str) -> Result<String> {
        let extracts = try_join_all(
            sources
                .iter()
                .map(|s| self.call("map", prompts::map_excerpt(&s.content, question))),
        )
        .await?;

        let mut summaries: Vec<String> = extracts
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        let mut rounds = 0;
        while estimate_tokens(&summaries) > self.options.token_max && summaries.len() > 1 {
            if rounds == self.options.max_collapse_rounds {
                warn!(
                    tokens = estimate_tokens(&summaries),
                    token_max = self.options.token_max,
                    "Extracts still exceed the token budget after collapsing"
                );
                break;
            }
            rounds += 1;

            let groups = group_by_budget(&summaries, self.options.token_max);
            debug!(round = rounds, groups = groups.len(), "Collapsing extracts");

            summaries = try_join_all(groups.iter().map(|group| {
                self.call("collapse", prompts::combine_extracts(&group.join("\n\n"), question))
            }))
            .await?;
        }

        self.call("combine", prompts::combine_extracts(&summaries.join("\n\n"), question))
            .await
    }

    async fn call(&self, stage: &'static str, messages: Vec<ChatMessage>) -> Result<String> {
        if self.options.verbose {
            info!(stage, prompt = %prompts::render(&messages), "Prompt");
        } else {
            debug!(stage, prompt = %prompts::render(&messages), "Prompt");
        }

        let start = Instant::now();
        let result = self.llm.complete(&messages, &self.options.completion).await;
        metrics::record_llm(
            start.elapsed().as_secs_f64(),
            self.llm.model_name(),
            stage,
            result.is_ok(),
        );
        result
    }
}

/// Rough token count, about four bytes per token
fn estimate_tokens(texts: &[String]) -> usize {
    texts.iter().map(|t| t.len() / 4).sum()
}

/// Split texts into consecutive groups that each stay within `token_max`
/// (a single oversized text forms its own group)
fn group_by_budget(texts: &[String], token_max: usize) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0;

    for text in texts {
        let tokens = text.len() / 4;
        if !current.is_empty() && current_tokens + tokens > token_max {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(text.clone());
        current_tokens += tokens;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
