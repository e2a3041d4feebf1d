use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use foundry_eval_types::{FailureKind, Record};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::InvocationError;
use crate::evaluator::{ConfigHandle, Evaluator, RawScore};
use crate::http::send_json;

const SYSTEM_PROMPT: &str = "You are an impartial evaluator of AI assistant output. \
Follow the rubric exactly and answer only with the requested JSON.";

/// An LLM judge: renders a rubric template with record fields and asks a chat model
/// for `{"score": n, "reason": "..."}`.
pub struct PromptEvaluator {
    name: String,
    template: String,
    client: reqwest::Client,
}

impl PromptEvaluator {
    pub fn new(name: impl Into<String>, template: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            client,
        }
    }

    pub fn render(&self, record: &Record) -> String {
        placeholder_re()
            .replace_all(&self.template, |caps: &regex::Captures<'_>| match record.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .into_owned()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Evaluator for PromptEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, record: &Record, config: ConfigHandle<'_>) -> Result<RawScore> {
        let ConfigHandle::Model(model) = config else {
            return Err(InvocationError::new(
                FailureKind::MissingConfiguration,
                format!("{} needs a model configuration", self.name),
            )
            .into());
        };

        let body = json!({
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.render(record) },
            ],
            "temperature": 0.0,
            "max_tokens": 800,
        });
        let request = self
            .client
            .post(model.chat_completions_url())
            .header("api-key", &model.api_key)
            .json(&body);
        let completion: ChatResponse = send_json(request).await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| InvocationError::malformed_response("judge returned no content"))?;

        Ok(parse_judgement(&content)?)
    }
}

/// Extracts a score from a judge reply: an embedded JSON object first, then a
/// `Score: n` line.
pub fn parse_judgement(content: &str) -> Result<RawScore, InvocationError> {
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            if let Ok(raw) = serde_json::from_str::<RawScore>(&content[start..=end]) {
                if raw.value.is_some() {
                    return Ok(raw);
                }
            }
        }
    }
    if let Some(caps) = score_line_re().captures(content) {
        if let Ok(value) = caps[1].parse::<f64>() {
            return Ok(RawScore::new(value).with_reason(content.trim()));
        }
    }
    Err(InvocationError::malformed_response(format!(
        "no score in judge reply: {}",
        content.chars().take(120).collect::<String>()
    )))
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder pattern is valid"))
}

fn score_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)score\W{0,3}\s*[:=]?\s*(-?\d+(?:\.\d+)?)").expect("score pattern is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_fields() {
        let eval = PromptEvaluator::new(
            "relevance",
            "Q: {{query}}\nA: {{ response }}\nMissing: [{{context}}]",
            reqwest::Client::new(),
        );
        let record = Record::from_value(json!({"query": "Why?", "response": "Because."})).unwrap();
        assert_eq!(eval.render(&record), "Q: Why?\nA: Because.\nMissing: []");
    }

    #[test]
    fn parses_json_reply() {
        let raw = parse_judgement("Sure.\n{\"score\": 4, \"reason\": \"mostly relevant\"}").unwrap();
        assert_eq!(raw.value, Some(json!(4)));
        assert_eq!(raw.reason.as_deref(), Some("mostly relevant"));
    }

    #[test]
    fn falls_back_to_score_line() {
        let raw = parse_judgement("The answer is fluent.\nScore: 5").unwrap();
        assert_eq!(raw.value, Some(json!(5.0)));
    }

    #[test]
    fn rejects_reply_without_score() {
        let err = parse_judgement("I cannot evaluate this.").unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn missing_model_config_is_classified() {
        let eval = PromptEvaluator::new("coherence", "{{response}}", reqwest::Client::new());
        let record = Record::from_value(json!({"response": "hi"})).unwrap();
        let err = eval.score(&record, ConfigHandle::None).await.unwrap_err();
        assert_eq!(InvocationError::classify(&err).kind, FailureKind::MissingConfiguration);
    }
}
