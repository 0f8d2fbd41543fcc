//! Chat backends.
//!
//! The responder only needs one capability from a language model:
//! `generate(prompt, options) -> text`. [`ChatBackend`] captures it; the
//! variant (local Ollama or the hosted OpenAI API) is chosen once, when the
//! backend is constructed by [`create_backend`].
//!
//! `rag chat --stream` also uses [`ChatBackend::generate_stream`], which
//! yields reply fragments as the service produces them: newline-delimited
//! JSON from Ollama, server-sent events from OpenAI.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::config::LlmConfig;
use crate::http::{build_client, post_json_with_retry, send_with_retry};

/// Which chat service answers prompts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum ServiceType {
    #[default]
    #[serde(rename = "ollama")]
    #[value(name = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Ollama => "ollama",
            ServiceType::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ServiceType::Ollama),
            "openai" => Ok(ServiceType::OpenAi),
            other => bail!(
                "Invalid service type '{}'. Must be 'ollama' or 'openai'.",
                other
            ),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub system: Option<String>,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            system: None,
            temperature: 0.7,
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Service label for logs (`"ollama"`, `"openai"`).
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Reply fragments in arrival order. The default yields the whole
    /// [`generate`](Self::generate) reply as one fragment.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TokenStream> {
        let reply = self.generate(prompt, options).await?;
        Ok(stream::once(async move { Ok(reply) }).boxed())
    }
}

/// Reply fragments from a streaming chat call.
pub type TokenStream = BoxStream<'static, Result<String>>;

fn chat_messages(prompt: &str, options: &GenerateOptions) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &options.system {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    messages.push(serde_json::json!({"role": "user", "content": prompt}));
    messages
}

// ============ Ollama ============

pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(model: &str, config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt, options),
            "stream": false,
            "options": { "temperature": options.temperature },
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_chat(&json)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt, options),
            "stream": true,
            "options": { "temperature": options.temperature },
        });
        let response = send_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        Ok(token_stream(response, parse_ollama_stream_line))
    }
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
}

/// One NDJSON line of a streaming `/api/chat` reply.
fn parse_ollama_stream_line(line: &str) -> Result<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }
    let json: serde_json::Value =
        serde_json::from_str(line).context("Invalid Ollama stream line")?;
    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", error);
    }
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Ok(match (done, content.is_empty()) {
        (false, false) => StreamLine::Token(content.to_string()),
        (false, true) => StreamLine::Skip,
        (true, false) => StreamLine::Last(content.to_string()),
        (true, true) => StreamLine::Done,
    })
}

// ============ OpenAI ============

pub struct OpenAIChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAIChat {
    /// Requires `OPENAI_API_KEY` in the environment.
    pub fn new(model: &str, config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAIChat {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt, options),
            "temperature": options.temperature,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_chat(&json)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(prompt, options),
            "temperature": options.temperature,
            "stream": true,
        });
        let response = send_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        Ok(token_stream(response, parse_openai_sse_line))
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// One server-sent-event line of a streaming chat completion.
fn parse_openai_sse_line(line: &str) -> Result<StreamLine> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments and other SSE fields.
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    let json: serde_json::Value =
        serde_json::from_str(data).context("Invalid OpenAI stream event")?;
    if let Some(error) = json.pointer("/error/message").and_then(|e| e.as_str()) {
        bail!("OpenAI stream error: {}", error);
    }
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(content) if !content.is_empty() => Ok(StreamLine::Token(content.to_string())),
        _ => Ok(StreamLine::Skip),
    }
}

// ============ Streaming ============

/// What one line of a streamed reply contributes.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    /// Final fragment; nothing after it is read.
    Last(String),
    Skip,
    Done,
}

/// Splits a byte stream into lines, holding back a trailing partial line
/// until the rest of it arrives.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

type LineParser = fn(&str) -> Result<StreamLine>;

struct TokenReader {
    bytes: BoxStream<'static, Result<Vec<u8>>>,
    lines: LineBuffer,
    pending: VecDeque<String>,
    parse: LineParser,
    done: bool,
    /// Reported after the fragments that preceded it.
    error: Option<anyhow::Error>,
}

impl TokenReader {
    fn new(bytes: BoxStream<'static, Result<Vec<u8>>>, parse: LineParser) -> Self {
        Self {
            bytes,
            lines: LineBuffer::default(),
            pending: VecDeque::new(),
            parse,
            done: false,
            error: None,
        }
    }

    async fn next_token(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            if let Some(error) = self.error.take() {
                return Err(error);
            }
            if self.done {
                return Ok(None);
            }
            let lines = match self.bytes.next().await {
                Some(chunk) => self.lines.push(&chunk?),
                None => {
                    self.done = true;
                    self.lines.finish().into_iter().collect()
                }
            };
            for line in lines {
                let parsed = match (self.parse)(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        self.error = Some(e);
                        self.done = true;
                        break;
                    }
                };
                match parsed {
                    StreamLine::Token(token) => self.pending.push_back(token),
                    StreamLine::Skip => {}
                    StreamLine::Last(token) => {
                        self.pending.push_back(token);
                        self.done = true;
                        break;
                    }
                    StreamLine::Done => {
                        self.done = true;
                        break;
                    }
                }
            }
        }
    }

    fn into_stream(self) -> TokenStream {
        stream::try_unfold(self, |mut reader| async move {
            reader
                .next_token()
                .await
                .map(|token| token.map(|token| (token, reader)))
        })
        .boxed()
    }
}

fn token_stream(response: reqwest::Response, parse: LineParser) -> TokenStream {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::from))
        .boxed();
    TokenReader::new(bytes, parse).into_stream()
}

/// Construct the backend for `service`. An empty or missing `model` falls
/// back to the configured default for that service.
pub fn create_backend(
    service: ServiceType,
    model: Option<&str>,
    config: &LlmConfig,
) -> Result<Box<dyn ChatBackend>> {
    let model = model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| config.default_model(service));
    match service {
        ServiceType::Ollama => Ok(Box::new(OllamaChat::new(model, config)?)),
        ServiceType::OpenAi => Ok(Box::new(OpenAIChat::new(model, config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_parses_known_names() {
        assert_eq!("ollama".parse::<ServiceType>().unwrap(), ServiceType::Ollama);
        assert_eq!("OpenAI".parse::<ServiceType>().unwrap(), ServiceType::OpenAi);
        let err = "mistral".parse::<ServiceType>().unwrap_err();
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn service_type_display_matches_wire_name() {
        assert_eq!(ServiceType::OpenAi.to_string(), "openai");
        let json = serde_json::to_string(&ServiceType::Ollama).unwrap();
        assert_eq!(json, "\"ollama\"");
    }

    #[test]
    fn ollama_reply_content() {
        let json = serde_json::json!({
            "model": "llama3:8b",
            "message": {"role": "assistant", "content": "Hi there"},
            "done": true
        });
        assert_eq!(parse_ollama_chat(&json).unwrap(), "Hi there");
        assert!(parse_ollama_chat(&serde_json::json!({"done": true})).is_err());
    }

    #[test]
    fn openai_reply_content() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "42"}}]
        });
        assert_eq!(parse_openai_chat(&json).unwrap(), "42");
        assert!(parse_openai_chat(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn system_message_comes_first() {
        let options = GenerateOptions {
            system: Some("be brief".to_string()),
            temperature: 0.0,
        };
        let messages = chat_messages("hello", &options);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn ollama_stream_lines() {
        let line = r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(
            parse_ollama_stream_line(line).unwrap(),
            StreamLine::Token("Hel".to_string())
        );
        let last = r#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":12}"#;
        assert_eq!(parse_ollama_stream_line(last).unwrap(), StreamLine::Done);
        assert_eq!(parse_ollama_stream_line("  ").unwrap(), StreamLine::Skip);
        let err = parse_ollama_stream_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
        assert!(parse_ollama_stream_line("{not json").is_err());
    }

    #[test]
    fn openai_sse_lines() {
        let event = r#"data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}"#;
        assert_eq!(
            parse_openai_sse_line(event).unwrap(),
            StreamLine::Token("lo".to_string())
        );
        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_sse_line(role_only).unwrap(), StreamLine::Skip);
        assert_eq!(parse_openai_sse_line("data: [DONE]\r").unwrap(), StreamLine::Done);
        assert_eq!(parse_openai_sse_line("").unwrap(), StreamLine::Skip);
        assert_eq!(parse_openai_sse_line(": keep-alive").unwrap(), StreamLine::Skip);
        assert!(parse_openai_sse_line("data: {oops").is_err());
    }

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buf.push(b":2}\n\n"), vec!["{\"b\":2}", ""]);
        assert_eq!(buf.push(b"tail"), Vec::<String>::new());
        assert_eq!(buf.finish().as_deref(), Some("tail"));
        assert_eq!(buf.finish(), None);
    }

    fn chunks(parts: &[&str]) -> BoxStream<'static, Result<Vec<u8>>> {
        let parts: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn ndjson_tokens_across_chunk_boundaries() {
        let bytes = chunks(&[
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"mess",
            "age\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ]);
        let tokens: Vec<String> = TokenReader::new(bytes, parse_ollama_stream_line)
            .into_stream()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn sse_tokens_stop_at_done() {
        let bytes = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"2\"}}]}\n\ndata: [DONE]\n\n",
        ]);
        let tokens: Vec<String> = TokenReader::new(bytes, parse_openai_sse_line)
            .into_stream()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["4", "2"]);
    }

    #[tokio::test]
    async fn stream_surfaces_backend_error() {
        let bytes = chunks(&["{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"error\":\"boom\"}\n"]);
        let results: Vec<Result<String>> = TokenReader::new(bytes, parse_ollama_stream_line)
            .into_stream()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "a");
        assert!(results[1].as_ref().unwrap_err().to_string().contains("boom"));
    }

    #[test]
    fn create_backend_uses_default_model() {
        let config = LlmConfig::default();
        let backend = create_backend(ServiceType::Ollama, None, &config).unwrap();
        assert_eq!(backend.name(), "ollama");
        assert_eq!(backend.model(), "llama3:8b");

        let backend = create_backend(ServiceType::Ollama, Some("mistral"), &config).unwrap();
        assert_eq!(backend.model(), "mistral");
    }
}
