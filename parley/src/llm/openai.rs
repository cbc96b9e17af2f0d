//! OpenAI-compatible chat-completions client over SSE.
//!
//! Speaks the standard `/chat/completions` wire format directly with `reqwest`, so any
//! OpenAI-compatible endpoint works by pointing `base_url` at it. Streaming accumulates
//! content and tool-call argument deltas while forwarding tokens to the caller.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::llm::{
    ChatMessage, ChatRole, LlmClient, LlmError, LlmReply, LlmUsage, ProviderConfig, TokenChunk,
    ToolInvocation,
};
use crate::tools::ToolSpec;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiChatClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, LlmError> {
        Ok(Self {
            http: reqwest::Client::new(),
            api_key: config.resolve_api_key()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = self.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = message.chars().take(500).collect();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut obj = json!({"role": role, "content": m.content});
            if let Some(name) = &m.name {
                obj["name"] = json!(name);
            }
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = json!(id);
            }
            if !m.tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {"name": c.name, "arguments": c.arguments},
                            })
                        })
                        .collect(),
                );
            }
            obj
        })
        .collect()
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description.clone().unwrap_or_default(),
            "parameters": spec.input_schema,
        },
    })
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for LlmUsage {
    fn from(u: WireUsage) -> Self {
        LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

/// Accumulates streamed tool-call deltas by index until the stream closes.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: Vec<ToolInvocation>,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: DeltaToolCall) {
        let index = delta.index.unwrap_or(self.calls.len().saturating_sub(1));
        while self.calls.len() <= index {
            self.calls.push(ToolInvocation {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
        }
        let call = &mut self.calls[index];
        if let Some(id) = delta.id {
            call.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> Vec<ToolInvocation> {
        self.calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        let body = self.request_body(messages, tools, false);
        let response = self.post(&body).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response had no choices".into()))?;
        Ok(LlmReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolInvocation {
                    id: c.id.unwrap_or_default(),
                    name: c.function.name.unwrap_or_default(),
                    arguments: c.function.arguments.unwrap_or_default(),
                })
                .collect(),
            usage: parsed.usage.map(Into::into),
        })
    }

    async fn invoke_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        chunk_tx: Option<mpsc::Sender<TokenChunk>>,
    ) -> Result<LlmReply, LlmError> {
        let body = self.request_body(messages, tools, true);
        let response = self.post(&body).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut usage: Option<LlmUsage> = None;
        let mut accumulator = ToolCallAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                let parsed: StreamChunk = match serde_json::from_str(data) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!(error = %e, "skipping undecodable sse chunk");
                        continue;
                    }
                };
                if let Some(u) = parsed.usage {
                    usage = Some(u.into());
                }
                for choice in parsed.choices {
                    if let Some(token) = choice.delta.content {
                        if !token.is_empty() {
                            content.push_str(&token);
                            if let Some(tx) = &chunk_tx {
                                let _ = tx.send(TokenChunk { token }).await;
                            }
                        }
                    }
                    for delta in choice.delta.tool_calls.unwrap_or_default() {
                        accumulator.apply(delta);
                    }
                }
            }
        }

        Ok(LlmReply {
            content,
            tool_calls: accumulator.finish(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: interleaved tool-call deltas reassemble into complete invocations.
    #[test]
    fn accumulator_reassembles_deltas() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(DeltaToolCall {
            index: Some(0),
            id: Some("call-1".into()),
            function: Some(WireFunction {
                name: Some("search".into()),
                arguments: Some("{\"que".into()),
            }),
        });
        acc.apply(DeltaToolCall {
            index: Some(1),
            id: Some("call-2".into()),
            function: Some(WireFunction {
                name: Some("wait".into()),
                arguments: Some("{}".into()),
            }),
        });
        acc.apply(DeltaToolCall {
            index: Some(0),
            id: None,
            function: Some(WireFunction {
                name: None,
                arguments: Some("ry\":\"x\"}".into()),
            }),
        });
        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, "{\"query\":\"x\"}");
        assert_eq!(calls[1].name, "wait");
    }

    /// **Scenario**: assistant tool calls and tool results serialize to the OpenAI shape.
    #[test]
    fn wire_messages_shape() {
        let mut assistant = ChatMessage::assistant("");
        assistant.tool_calls = vec![ToolInvocation {
            id: "c1".into(),
            name: "search".into(),
            arguments: "{}".into(),
        }];
        let mut tool = ChatMessage::user("result");
        tool.role = ChatRole::Tool;
        tool.tool_call_id = Some("c1".into());

        let wire = wire_messages(&[assistant, tool]);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }
}
