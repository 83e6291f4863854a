//! Prompt templating and answer synthesis.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::document::{Answer, SearchResult};
use crate::error::{RagError, Result, with_timeout};
use crate::llm::LanguageModel;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUESTION_PLACEHOLDER: &str = "{question}";

/// Separator placed between chunk texts in the context section.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// The default persona: a cultural-resource question answering assistant.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are a professional cultural-resource question answering assistant.
---
Context:
{context}
---
Question: {question}
---
Your answer:
";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A prompt template with `{context}` and `{question}` placeholders.
///
/// The template is parsed once; values are substituted in a single pass, so a
/// placeholder appearing inside a chunk or the question is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless both `{context}` and
    /// `{question}` occur at least once.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let source = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !source.contains(placeholder) {
                return Err(RagError::InvalidConfiguration(format!(
                    "prompt template is missing the {placeholder} placeholder"
                )));
            }
        }

        Ok(Self::parse(source))
    }

    fn parse(source: String) -> Self {
        let mut segments = Vec::new();
        let mut rest = source.as_str();
        loop {
            let next = [
                (CONTEXT_PLACEHOLDER, Segment::Context),
                (QUESTION_PLACEHOLDER, Segment::Question),
            ]
            .into_iter()
            .filter_map(|(p, seg)| rest.find(p).map(|pos| (pos, p.len(), seg)))
            .min_by_key(|(pos, _, _)| *pos);

            match next {
                Some((pos, len, segment)) => {
                    if pos > 0 {
                        segments.push(Segment::Literal(rest[..pos].to_string()));
                    }
                    segments.push(segment);
                    rest = &rest[pos + len..];
                }
                None => {
                    if !rest.is_empty() {
                        segments.push(Segment::Literal(rest.to_string()));
                    }
                    break;
                }
            }
        }

        Self { source, segments }
    }

    /// The template text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fill the placeholders.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + context.len() + question.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Context => out.push_str(context),
                Segment::Question => out.push_str(question),
            }
        }
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_PROMPT_TEMPLATE.to_string())
    }
}

/// Join chunk texts in ranking order.
pub fn format_context(context: &[SearchResult]) -> String {
    context.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR)
}

/// Produces answers by filling a [`PromptTemplate`] and calling a [`LanguageModel`].
///
/// The model output is returned verbatim. Failures are not retried.
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    timeout: Duration,
}

impl AnswerSynthesizer {
    /// Create a synthesizer.
    pub fn new(model: Arc<dyn LanguageModel>, template: PromptTemplate, timeout: Duration) -> Self {
        Self { model, template, timeout }
    }

    /// Return the prompt template in use.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Build the prompt sent to the model for `question` and `context`.
    pub fn prompt(&self, question: &str, context: &[SearchResult]) -> String {
        self.template.render(&format_context(context), question)
    }

    /// Answer `question` from `context`.
    ///
    /// An empty `context` still produces a call to the model, with an empty
    /// context section.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Provider`] if the model call fails and
    /// [`RagError::ProviderTimeout`] if it exceeds the configured timeout.
    pub async fn synthesize(&self, question: &str, context: &[SearchResult]) -> Result<Answer> {
        let prompt = self.prompt(question, context);
        debug!(model = self.model.name(), prompt_len = prompt.len(), "calling language model");

        let text =
            with_timeout(self.model.name(), "complete", self.timeout, self.model.complete(&prompt))
                .await?;

        info!(
            model = self.model.name(),
            context_chunks = context.len(),
            answer_len = text.len(),
            "answer synthesized"
        );
        Ok(Answer { text, sources: context.to_vec() })
    }
}
