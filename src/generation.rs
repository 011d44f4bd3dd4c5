use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{
    error::AppError,
    models::{Concept, Flashcard, FlashcardDeck, QuizContent, QuizQuestion},
};

pub const DEFAULT_ITEM_COUNT: u32 = 5;
pub const MAX_ITEM_COUNT: u32 = 30;
pub const DEFAULT_MAX_CONCEPTS: u32 = 8;

fn default_count() -> u32 {
    DEFAULT_ITEM_COUNT
}

// --- Requests ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct QuizRequest {
    pub source_text: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FlashcardRequest {
    pub source_text: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConceptRequest {
    pub source_text: String,
    pub max_concepts: u32,
}

/// Rejects requests the model cannot sensibly serve before any network call is made.
pub fn validate_request(source_text: &str, count: u32) -> Result<(), AppError> {
    if source_text.trim().is_empty() {
        return Err(AppError::validation("source_text must not be empty"));
    }
    if count == 0 || count > MAX_ITEM_COUNT {
        return Err(AppError::validation(format!(
            "count must be between 1 and {}",
            MAX_ITEM_COUNT
        )));
    }
    Ok(())
}

// --- Errors ---

/// GenerationError
///
/// Every way a call to the hosted model can fail. All of them surface to clients as
/// `GENERATION_FAILED` (502).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    Upstream(u16),
    #[error("model output did not match the expected shape: {0}")]
    Schema(String),
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        tracing::warn!("content generation failed: {}", err);
        AppError::GenerationFailed(err.to_string())
    }
}

// 1. ContentGenerator Contract
/// ContentGenerator
///
/// The seam between the API and the hosted generative model. Handlers only see this trait,
/// so the HTTP client can be replaced by `MockContentGenerator` in tests.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_quiz(&self, request: QuizRequest) -> Result<QuizContent, GenerationError>;

    async fn generate_flashcards(
        &self,
        request: FlashcardRequest,
    ) -> Result<FlashcardDeck, GenerationError>;

    async fn extract_concepts(
        &self,
        request: ConceptRequest,
    ) -> Result<Vec<Concept>, GenerationError>;
}

// 2. The Real Implementation (hosted model over HTTPS)

#[derive(Serialize)]
struct GenerateContentBody<'a> {
    contents: [PromptContent<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct PromptContent<'a> {
    role: &'static str,
    parts: [PromptPart<'a>; 1],
}

#[derive(Serialize)]
struct PromptPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConceptList {
    concepts: Vec<Concept>,
}

/// HostedModelClient
///
/// Calls a `generateContent`-style endpoint and asks for JSON output. The reply text is
/// parsed into the declared type; anything that does not fit is a `Schema` error.
#[derive(Clone)]
pub struct HostedModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HostedModelClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            api_key: api_key.to_string(),
        })
    }

    async fn complete<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, GenerationError> {
        let body = GenerateContentBody {
            contents: [PromptContent {
                role: "user",
                parts: [PromptPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.4,
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Upstream(response.status().as_u16()));
        }

        let reply = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| GenerationError::Schema(e.to_string()))?;

        parse_model_json(&first_candidate_text(reply)?)
    }
}

fn first_candidate_text(reply: GenerateContentResponse) -> Result<String, GenerationError> {
    reply
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .ok_or_else(|| GenerationError::Schema("response has no candidate text".into()))
}

/// Parses the model's JSON reply, tolerating a surrounding Markdown code fence.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| GenerationError::Schema(e.to_string()))
}

/// An empty quiz, or a question whose answer points outside its options, is a mismatch.
pub fn check_quiz(quiz: QuizContent) -> Result<QuizContent, GenerationError> {
    if quiz.questions.is_empty() {
        return Err(GenerationError::Schema("quiz has no questions".into()));
    }
    if let Some(bad) = quiz
        .questions
        .iter()
        .find(|q| q.options.len() < 2 || q.answer_index as usize >= q.options.len())
    {
        return Err(GenerationError::Schema(format!(
            "question '{}' has an invalid answer index",
            bad.question
        )));
    }
    Ok(quiz)
}

pub fn check_deck(deck: FlashcardDeck) -> Result<FlashcardDeck, GenerationError> {
    if deck.cards.is_empty() {
        return Err(GenerationError::Schema("deck has no cards".into()));
    }
    Ok(deck)
}

#[async_trait]
impl ContentGenerator for HostedModelClient {
    async fn generate_quiz(&self, request: QuizRequest) -> Result<QuizContent, GenerationError> {
        let prompt = format!(
            "Write {} multiple-choice questions ({} difficulty) about the text below. \
             Reply as JSON: {{\"questions\":[{{\"question\":string,\"options\":[string],\
             \"answer_index\":number,\"explanation\":string}}]}}\n\n{}",
            request.count,
            request.difficulty.as_deref().unwrap_or("medium"),
            request.source_text
        );
        check_quiz(self.complete(&prompt).await?)
    }

    async fn generate_flashcards(
        &self,
        request: FlashcardRequest,
    ) -> Result<FlashcardDeck, GenerationError> {
        let prompt = format!(
            "Write {} flashcards in a {} style about the text below. \
             Reply as JSON: {{\"cards\":[{{\"front\":string,\"back\":string}}]}}\n\n{}",
            request.count,
            request.style.as_deref().unwrap_or("concise"),
            request.source_text
        );
        check_deck(self.complete(&prompt).await?)
    }

    async fn extract_concepts(
        &self,
        request: ConceptRequest,
    ) -> Result<Vec<Concept>, GenerationError> {
        let prompt = format!(
            "List at most {} key concepts in the text below. \
             Reply as JSON: {{\"concepts\":[{{\"name\":string,\"description\":string}}]}}\n\n{}",
            request.max_concepts, request.source_text
        );
        let list: ConceptList = self.complete(&prompt).await?;
        if list.concepts.is_empty() {
            return Err(GenerationError::Schema("no concepts returned".into()));
        }
        Ok(list
            .concepts
            .into_iter()
            .take(request.max_concepts as usize)
            .collect())
    }
}

// 3. The Mock Implementation (For Unit Tests)
/// MockContentGenerator
///
/// Deterministic stand-in for the hosted model. Counts every call so tests can assert that
/// a code path never reached the adapter.
#[derive(Default)]
pub struct MockContentGenerator {
    /// When true, every call fails with an upstream error.
    pub should_fail: bool,
    calls: AtomicUsize,
}

impl MockContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) -> Result<(), GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(GenerationError::Upstream(503));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentGenerator for MockContentGenerator {
    async fn generate_quiz(&self, request: QuizRequest) -> Result<QuizContent, GenerationError> {
        self.record_call()?;
        let questions = (1..=request.count)
            .map(|i| QuizQuestion {
                question: format!("Question {}", i),
                options: vec!["A".into(), "B".into(), "C".into()],
                answer_index: 0,
                explanation: None,
            })
            .collect();
        Ok(QuizContent { questions })
    }

    async fn generate_flashcards(
        &self,
        request: FlashcardRequest,
    ) -> Result<FlashcardDeck, GenerationError> {
        self.record_call()?;
        let cards = (1..=request.count)
            .map(|i| Flashcard {
                front: format!("Term {}", i),
                back: format!("Definition {}", i),
            })
            .collect();
        Ok(FlashcardDeck { cards })
    }

    async fn extract_concepts(
        &self,
        request: ConceptRequest,
    ) -> Result<Vec<Concept>, GenerationError> {
        self.record_call()?;
        let concepts: Vec<Concept> = request
            .source_text
            .split_whitespace()
            .filter(|word| word.len() > 3)
            .take(request.max_concepts as usize)
            .map(|word| Concept {
                name: word.to_string(),
                description: None,
            })
            .collect();
        if concepts.is_empty() {
            return Err(GenerationError::Schema("no concepts returned".into()));
        }
        Ok(concepts)
    }
}

/// GeneratorState
///
/// The shared handle to the generation adapter carried in `AppState`.
pub type GeneratorState = Arc<dyn ContentGenerator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_json_strips_code_fence() {
        let text = "```json\n{\"cards\":[{\"front\":\"ATP\",\"back\":\"energy currency\"}]}\n```";
        let deck: FlashcardDeck = parse_model_json(text).unwrap();
        assert_eq!(deck.cards[0].front, "ATP");
    }

    #[test]
    fn test_parse_model_json_rejects_wrong_shape() {
        let result: Result<QuizContent, _> = parse_model_json("{\"cards\": []}");
        assert!(matches!(result, Err(GenerationError::Schema(_))));
    }

    #[test]
    fn test_quiz_check_rejects_out_of_range_answer() {
        let quiz = QuizContent {
            questions: vec![QuizQuestion {
                question: "2+2?".into(),
                options: vec!["3".into(), "4".into()],
                answer_index: 2,
                explanation: None,
            }],
        };
        assert!(check_quiz(quiz).is_err());
        assert!(check_quiz(QuizContent { questions: vec![] }).is_err());
    }

    #[test]
    fn test_candidate_text_extraction() {
        let reply: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"concepts\": []}"}]}}]
        }))
        .unwrap();
        assert_eq!(first_candidate_text(reply).unwrap(), "{\"concepts\": []}");

        let empty: GenerateContentResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(first_candidate_text(empty).is_err());
    }

    #[test]
    fn test_request_validation() {
        assert!(validate_request("photosynthesis", 5).is_ok());
        assert!(validate_request("   ", 5).is_err());
        assert!(validate_request("photosynthesis", 0).is_err());
        assert!(validate_request("photosynthesis", MAX_ITEM_COUNT + 1).is_err());
    }

    #[tokio::test]
    async fn test_mock_counts_calls_and_can_fail() {
        let mock = MockContentGenerator::new();
        let quiz = mock
            .generate_quiz(QuizRequest {
                source_text: "cells".into(),
                count: 3,
                difficulty: None,
            })
            .await
            .unwrap();
        assert_eq!(quiz.questions.len(), 3);
        assert_eq!(mock.call_count(), 1);

        let failing = MockContentGenerator::new_failing();
        let result = failing
            .extract_concepts(ConceptRequest {
                source_text: "mitochondria".into(),
                max_concepts: 3,
            })
            .await;
        assert!(matches!(result, Err(GenerationError::Upstream(503))));
        assert_eq!(failing.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_without_concepts_is_a_schema_error() {
        let mock = MockContentGenerator::new();
        let result = mock
            .extract_concepts(ConceptRequest {
                source_text: "a is to b".into(),
                max_concepts: 3,
            })
            .await;
        assert!(matches!(result, Err(GenerationError::Schema(_))));

        let concepts = mock
            .extract_concepts(ConceptRequest {
                source_text: "the mitochondria powers cells".into(),
                max_concepts: 3,
            })
            .await
            .unwrap();
        assert_eq!(concepts.len(), 3);
    }
}
