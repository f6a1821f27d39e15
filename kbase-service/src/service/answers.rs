//! Question answering over indexed documents.
//!
//! Context comes either from one document's chunk rows or from the best
//! search hits of a space; the chat model answers from that context only.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::{ChatMessage, ChatModel, with_timeout};
use crate::error::{ClientError, ServiceError, ServiceResult};
use crate::service::KnowledgeBaseService;

const SYSTEM_PROMPT: &str = "You are an assistant that answers questions from knowledge base \
    documents. Use only the excerpts below.";
const NO_ANSWER_HINT: &str = "If the excerpts do not contain the answer, say that the \
    provided documents do not cover the question.";

/// A document an answer drew on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerSource {
    pub document_id: String,
    pub title: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
}

/// System and user messages for one question.
///
/// Excerpts are added in order until `max_context_chars` is spent; the one
/// that crosses the budget is cut on a character boundary.
pub(crate) fn build_messages(
    question: &str,
    excerpts: &[String],
    max_context_chars: usize,
) -> Vec<ChatMessage> {
    let mut prompt = String::from(SYSTEM_PROMPT);
    prompt.push_str("\n\n");

    let mut budget = max_context_chars;
    for (i, excerpt) in excerpts.iter().enumerate() {
        if budget == 0 {
            break;
        }
        let text: String = excerpt.chars().take(budget).collect();
        budget -= text.chars().count();
        prompt.push_str(&format!("Excerpt {}:\n{}\n\n", i + 1, text));
    }
    prompt.push_str(NO_ANSWER_HINT);

    vec![ChatMessage::system(prompt), ChatMessage::user(question)]
}

impl KnowledgeBaseService {
    /// Answer a question from the full indexed text of one document
    pub async fn ask_document(&self, document_id: &str, question: &str) -> ServiceResult<Answer> {
        let question = require_question(question)?;
        let document = self.require_document(document_id)?;
        let excerpts: Vec<String> = self
            .db
            .get_document_chunks(document_id)?
            .into_iter()
            .map(|c| c.content)
            .collect();
        if excerpts.is_empty() {
            return Err(ServiceError::NoContext {
                message: format!("document {} has no indexed chunks", document_id),
            });
        }

        let answer = self.complete_answer(question, &excerpts).await?;
        metrics::counter!("kbase_questions_answered_total", "scope" => "document").increment(1);
        info!(doc_id = %document_id, excerpts = excerpts.len(), "Answered document question");

        Ok(Answer {
            answer,
            sources: vec![AnswerSource {
                document_id: document.id,
                title: document.title,
                file_name: document.file_name,
            }],
        })
    }

    /// Answer a question from the best matching chunks of published
    /// documents in a space
    pub async fn ask_space(&self, space_id: &str, question: &str) -> ServiceResult<Answer> {
        let question = require_question(question)?;
        let top_k = self.runtime_config.dynamic().chat.context_chunks;

        let hits = self
            .search_published_chunks(question, space_id, Some(top_k))
            .await?;
        if hits.is_empty() {
            return Err(ServiceError::NoContext {
                message: format!("no published document in space {} matches", space_id),
            });
        }

        let mut sources: Vec<AnswerSource> = Vec::new();
        let mut excerpts = Vec::with_capacity(hits.len());
        for (hit, content) in hits {
            if !sources.iter().any(|s| s.document_id == hit.document_id) {
                sources.push(AnswerSource {
                    document_id: hit.document_id,
                    title: hit.title,
                    file_name: hit.file_name,
                });
            }
            excerpts.push(content);
        }

        let answer = self.complete_answer(question, &excerpts).await?;
        metrics::counter!("kbase_questions_answered_total", "scope" => "space").increment(1);
        info!(
            space_id = %space_id,
            excerpts = excerpts.len(),
            sources = sources.len(),
            "Answered space question"
        );

        Ok(Answer { answer, sources })
    }

    async fn complete_answer(&self, question: &str, excerpts: &[String]) -> ServiceResult<String> {
        let chat: Arc<dyn ChatModel> = self.chat.clone().ok_or(ServiceError::Answer(
            ClientError::NotConfigured {
                client: "Chat model",
            },
        ))?;
        let (limit, max_context_chars) = {
            let config = self.runtime_config.dynamic();
            (config.timeouts.chat(), config.chat.max_context_chars)
        };

        let messages = build_messages(question, excerpts, max_context_chars);
        debug!(model = %chat.model_name(), excerpts = excerpts.len(), "Requesting answer");

        with_timeout("chat completion", limit, chat.complete(&messages))
            .await
            .map_err(ServiceError::Answer)
    }
}

fn require_question(question: &str) -> ServiceResult<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "Question is empty".to_string(),
        });
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DocumentStatus;
    use crate::test_support::{ScriptedChat, TestHarness};

    #[test]
    fn test_build_messages_respects_context_budget() {
        let excerpts = vec!["a".repeat(30), "b".repeat(30), "c".repeat(30)];
        let messages = build_messages("what?", &excerpts, 45);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1], ChatMessage::user("what?"));

        let prompt = &messages[0].content;
        assert!(prompt.contains(&"a".repeat(30)));
        assert!(prompt.contains(&format!("Excerpt 2:\n{}\n", "b".repeat(15))));
        assert!(!prompt.contains(&"b".repeat(16)));
        assert!(!prompt.contains("Excerpt 3"));
    }

    #[tokio::test]
    async fn test_ask_document_uses_its_chunks() {
        let chat = Arc::new(ScriptedChat::replying("It covers onboarding."));
        let harness = TestHarness::builder().chat(chat.clone()).build();
        let doc = harness
            .ingest(harness.new_document("onboarding.txt"), b"Week one: laptop setup and accounts.")
            .await;

        let answer = harness
            .service
            .ask_document(&doc.id, " What is in week one? ")
            .await
            .unwrap();

        assert_eq!(answer.answer, "It covers onboarding.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].file_name, "onboarding.txt");

        let requests = chat.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][0].content.contains("laptop setup"));
        assert_eq!(requests[0][1].content, "What is in week one?");
    }

    #[tokio::test]
    async fn test_ask_document_without_chunks() {
        let chat = Arc::new(ScriptedChat::replying("unused"));
        let harness = TestHarness::builder().chat(chat.clone()).build();
        let failed = harness
            .ingest(harness.new_document("scan.bin"), &[1, 2, 3])
            .await;
        assert_eq!(failed.status, DocumentStatus::ProcessFailed);

        let err = harness
            .service
            .ask_document(&failed.id, "anything?")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no_context");

        let err = harness
            .service
            .ask_document("missing", "anything?")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(chat.requests().is_empty());
    }

    #[tokio::test]
    async fn test_ask_space_answers_from_published_hits() {
        let chat = Arc::new(ScriptedChat::replying("Use the blue form."));
        let harness = TestHarness::builder().chat(chat.clone()).build();
        let text = "Expense claims are filed with the blue form. ".repeat(3);

        let draft = harness
            .ingest(harness.new_document("draft.txt"), b"Expense claims draft notes")
            .await;
        let policy = harness
            .ingest(harness.new_document("policy.txt"), text.as_bytes())
            .await;
        harness.service.publish_document(&policy.id).unwrap();

        let answer = harness
            .service
            .ask_space("space-1", "How are expense claims filed?")
            .await
            .unwrap();

        assert_eq!(answer.answer, "Use the blue form.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document_id, policy.id);
        assert!(answer.sources.iter().all(|s| s.document_id != draft.id));
        assert!(chat.requests()[0][0].content.contains("blue form"));
    }

    #[tokio::test]
    async fn test_ask_space_without_published_documents() {
        let chat = Arc::new(ScriptedChat::replying("unused"));
        let harness = TestHarness::builder().chat(chat.clone()).build();
        harness
            .ingest(harness.new_document("draft.txt"), b"unpublished notes")
            .await;

        let err = harness
            .service
            .ask_space("space-1", "notes?")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoContext { .. }));
        assert!(chat.requests().is_empty());
    }

    #[tokio::test]
    async fn test_questions_need_a_chat_model() {
        let harness = TestHarness::new();
        let doc = harness
            .ingest(harness.new_document("notes.txt"), b"some notes")
            .await;

        let err = harness
            .service
            .ask_document(&doc.id, "what?")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "answer_failure");

        let err = harness.service.ask_document(&doc.id, "  ").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }
}
