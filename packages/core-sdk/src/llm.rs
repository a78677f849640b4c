use std::pin::Pin;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::models::{ChatMessage, LlmConfig, StreamErrorKind, StreamItem};
use crate::telemetry;

/** \brief 适配器产出的惰性片段流：每次网络读取都是一个挂起点。 */
pub type FragmentStream = Pin<Box<dyn Stream<Item = StreamItem> + Send>>;

/** \brief DashScope 原生文本生成 API 基地址。 */
const DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    DashScope,
    OpenAiCompatible,
}

/**
 * \brief 封闭分发表：dashscope 走原生协议，其余已知 Provider 走
 * OpenAI 兼容协议，未知名称返回 None。
 */
fn provider_kind(provider: &str) -> Option<ProviderKind> {
    match provider.to_ascii_lowercase().as_str() {
        "dashscope" => Some(ProviderKind::DashScope),
        "openai" | "deepseek" | "moonshot" | "claude" | "gemini" => {
            Some(ProviderKind::OpenAiCompatible)
        }
        _ => None,
    }
}

/**
 * \brief OpenAI 兼容家族各 Provider 的官方端点。
 */
fn default_base_url(provider: &str) -> &'static str {
    match provider.to_ascii_lowercase().as_str() {
        "deepseek" => "https://api.deepseek.com",
        "moonshot" => "https://api.moonshot.cn/v1",
        "claude" => "https://api.anthropic.com/v1",
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        _ => "https://api.openai.com/v1",
    }
}

/**
 * \brief 按配置分发到对应适配器，返回惰性片段流。
 * \details 本层不做重试、不做跨 Provider 回退；未知 Provider 仅产出
 * 一条错误片段，不发起任何网络调用。四类失败全部在适配器边界收敛为
 * 内联片段，不会以协议级错误形式逃逸。
 */
pub fn stream_chat(
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
    fallback_key: Option<&str>,
) -> FragmentStream {
    match provider_kind(&config.provider) {
        Some(ProviderKind::DashScope) => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| fallback_key.map(str::to_owned).filter(|k| !k.is_empty()));
            stream_dashscope(config.model.clone(), messages, key, config.base_url.clone())
        }
        Some(ProviderKind::OpenAiCompatible) => stream_openai_compatible(
            config.provider.clone(),
            config.model.clone(),
            messages,
            config.api_key.clone(),
            config.base_url.clone(),
        ),
        None => {
            telemetry::log_error(
                "llm.route",
                &format!("unsupported provider '{}'", config.provider),
            );
            once_item(StreamItem::error(
                StreamErrorKind::UnsupportedProvider,
                format!("Error: Unsupported provider '{}'.", config.provider),
            ))
        }
    }
}

fn once_item(item: StreamItem) -> FragmentStream {
    Box::pin(futures_util::stream::iter([item]))
}

/**
 * \brief DashScope 原生流式适配器。
 * \details 增量输出、message 结果格式。单个事件失败只产出一条内联
 * 错误片段，流不终止（后续事件仍可能到达）；传输异常则产出最后一条
 * 错误片段并结束。
 */
fn stream_dashscope(
    model: String,
    messages: Vec<ChatMessage>,
    api_key: Option<String>,
    base_url: Option<String>,
) -> FragmentStream {
    let Some(key) = api_key else {
        return once_item(StreamItem::error(
            StreamErrorKind::MissingCredential,
            "Error: DashScope API Key is missing. Please configure it in the backend or settings.",
        ));
    };

    let base = base_url
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DASHSCOPE_API_BASE.to_string());
    let url = format!(
        "{}/services/aigc/text-generation/generation",
        base.trim_end_matches('/')
    );
    let body = json!({
        "model": model,
        "input": { "messages": messages },
        "parameters": { "result_format": "message", "incremental_output": true }
    });

    Box::pin(stream! {
        let client = reqwest::Client::new();
        let sent = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", key))
            .header("X-DashScope-SSE", "enable")
            .json(&body)
            .send()
            .await;

        match sent {
            Err(e) => {
                telemetry::log_error("llm.dashscope", &format!("request failed: {}", e));
                yield StreamItem::error(
                    StreamErrorKind::TransportException,
                    format!("Exception: {}", e),
                );
            }
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                telemetry::log_error(
                    "llm.dashscope",
                    &format!("non-success status {}: {}", status, text),
                );
                yield StreamItem::error(
                    StreamErrorKind::ProviderCallFailure,
                    format_dashscope_http_error(status.as_u16(), &text),
                );
            }
            Ok(resp) => {
                let mut byte_stream = resp.bytes_stream();
                let mut buf = Vec::<u8>::new();
                let mut errored = false;

                while let Some(chunk) = byte_stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            telemetry::log_error(
                                "llm.dashscope",
                                &format!("stream read failed: {}", e),
                            );
                            yield StreamItem::error(
                                StreamErrorKind::TransportException,
                                format!("Exception: {}", e),
                            );
                            errored = true;
                            break;
                        }
                    };
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = find_double_newline(&buf) {
                        let block: Vec<u8> = buf.drain(..pos + 2).collect();
                        if let Some(line) = extract_data_line(&block) {
                            if let Some(item) = parse_dashscope_event(&line) {
                                yield item;
                            }
                        }
                    }
                }

                if !errored && !buf.is_empty() {
                    if let Some(line) = extract_data_line(&buf) {
                        if let Some(item) = parse_dashscope_event(&line) {
                            yield item;
                        }
                    }
                }
            }
        }
    })
}

/**
 * \brief OpenAI 兼容流式适配器（openai/deepseek/moonshot/claude/gemini）。
 * \details 此家族不读取进程级回退密钥，缺失密钥立即以一条本地化错误
 * 片段结束；任何异常同样收敛为最后一条错误片段并终止流。
 */
fn stream_openai_compatible(
    provider: String,
    model: String,
    messages: Vec<ChatMessage>,
    api_key: Option<String>,
    base_url: Option<String>,
) -> FragmentStream {
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        return once_item(StreamItem::error(
            StreamErrorKind::MissingCredential,
            format!("错误：未提供 {} 的 API Key，请在模型设置中填写后重试。", provider),
        ));
    };

    let base = base_url
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| default_base_url(&provider).to_string());
    let url = format!("{}/chat/completions", base.trim_end_matches('/'));
    let body = json!({
        "model": model,
        "messages": messages,
        "stream": true
    });

    Box::pin(stream! {
        let client = reqwest::Client::new();
        let sent = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", key))
            .json(&body)
            .send()
            .await;

        match sent {
            Err(e) => {
                telemetry::log_error(
                    "llm.openai",
                    &format!("request to {} failed: {}", provider, e),
                );
                yield StreamItem::error(
                    StreamErrorKind::TransportException,
                    format!("Exception: {}", e),
                );
            }
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                telemetry::log_error(
                    "llm.openai",
                    &format!("{} non-success status {}: {}", provider, status, text),
                );
                yield StreamItem::error(
                    StreamErrorKind::ProviderCallFailure,
                    format!("Error: {} - {}", status.as_u16(), text),
                );
            }
            Ok(resp) => {
                let mut byte_stream = resp.bytes_stream();
                let mut buf = Vec::<u8>::new();
                let mut done = false;
                let mut errored = false;

                while let Some(chunk) = byte_stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            telemetry::log_error(
                                "llm.openai",
                                &format!("{} stream read failed: {}", provider, e),
                            );
                            yield StreamItem::error(
                                StreamErrorKind::TransportException,
                                format!("Exception: {}", e),
                            );
                            errored = true;
                            break;
                        }
                    };
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = find_double_newline(&buf) {
                        let block: Vec<u8> = buf.drain(..pos + 2).collect();
                        if let Some(line) = extract_data_line(&block) {
                            if line.trim() == "[DONE]" {
                                done = true;
                                break;
                            }
                            if let Some(delta) = parse_openai_delta(&line) {
                                yield StreamItem::text(delta);
                            }
                        }
                    }
                    if done {
                        break;
                    }
                }

                if !errored && !done && !buf.is_empty() {
                    if let Some(line) = extract_data_line(&buf) {
                        if line.trim() != "[DONE]" {
                            if let Some(delta) = parse_openai_delta(&line) {
                                yield StreamItem::text(delta);
                            }
                        }
                    }
                }
            }
        }
    })
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn extract_data_line(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    for line in text.lines() {
        let line = line.trim_start();
        if line.starts_with("data:") {
            return Some(line[5..].trim().to_string());
        }
    }
    None
}

fn parse_openai_delta(line: &str) -> Option<String> {
    let v: Value = serde_json::from_str(line).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/**
 * \brief 解析一个 DashScope SSE 事件。
 * \details 成功事件取 `output.choices[0].message.content` 非空正文；
 * 携带错误码的事件转为一条内联失败片段；其余事件忽略。
 */
fn parse_dashscope_event(line: &str) -> Option<StreamItem> {
    let v: Value = serde_json::from_str(line).ok()?;

    if let Some(content) = v
        .get("output")
        .and_then(|o| o.get("choices"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        if content.is_empty() {
            return None;
        }
        return Some(StreamItem::text(content));
    }

    if let Some(code) = v
        .get("code")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
    {
        let message = v.get("message").and_then(|m| m.as_str()).unwrap_or_default();
        return Some(StreamItem::error(
            StreamErrorKind::ProviderCallFailure,
            format!("Error: {} - {}", code, message),
        ));
    }

    None
}

/**
 * \brief 整通调用被拒时的错误文案：能解析出错误码就沿用
 * `code - message` 格式，否则落回 HTTP 状态加原始正文。
 */
fn format_dashscope_http_error(status: u16, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(code) = v.get("code").and_then(|c| c.as_str()).filter(|c| !c.is_empty()) {
            let message = v.get("message").and_then(|m| m.as_str()).unwrap_or_default();
            return format!("Error: {} - {}", code, message);
        }
    }
    format!("Error: HTTP {} - {}", status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamError;

    fn user_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_dispatch_table_is_closed() {
        assert_eq!(provider_kind("dashscope"), Some(ProviderKind::DashScope));
        for name in ["openai", "deepseek", "moonshot", "claude", "gemini"] {
            assert_eq!(provider_kind(name), Some(ProviderKind::OpenAiCompatible));
        }
        assert_eq!(provider_kind("DashScope"), Some(ProviderKind::DashScope));
        assert_eq!(provider_kind("unsupported_x"), None);
        assert_eq!(provider_kind(""), None);
    }

    #[test]
    fn test_default_base_urls() {
        assert_eq!(default_base_url("openai"), "https://api.openai.com/v1");
        assert_eq!(default_base_url("deepseek"), "https://api.deepseek.com");
        assert_eq!(default_base_url("moonshot"), "https://api.moonshot.cn/v1");
        assert_eq!(default_base_url("claude"), "https://api.anthropic.com/v1");
        assert_eq!(
            default_base_url("gemini"),
            "https://generativelanguage.googleapis.com/v1beta/openai"
        );
    }

    #[test]
    fn test_find_double_newline_and_data_line() {
        let block = b"id:1\nevent:result\ndata: {\"x\":1}\n\nrest";
        let pos = find_double_newline(block).expect("find separator");
        assert_eq!(&block[pos..pos + 2], b"\n\n");
        assert_eq!(
            extract_data_line(&block[..pos + 2]).as_deref(),
            Some("{\"x\":1}")
        );
        assert_eq!(extract_data_line(b"id:1\nevent:result\n\n"), None);
    }

    #[test]
    fn test_parse_openai_delta() {
        let line = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_openai_delta(line).as_deref(), Some("Hi"));
        assert_eq!(
            parse_openai_delta(r#"{"choices":[{"delta":{"content":null}}]}"#),
            None
        );
        assert_eq!(parse_openai_delta(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(parse_openai_delta("not json"), None);
    }

    #[test]
    fn test_parse_dashscope_success_event() {
        let line = r#"{"output":{"choices":[{"message":{"role":"assistant","content":"AdGuard"}}]}}"#;
        assert_eq!(
            parse_dashscope_event(line),
            Some(StreamItem::Text("AdGuard".to_string()))
        );
        let empty = r#"{"output":{"choices":[{"message":{"content":""}}]}}"#;
        assert_eq!(parse_dashscope_event(empty), None);
    }

    #[test]
    fn test_parse_dashscope_error_event_is_inline_failure() {
        let line = r#"{"code":"Throttling.RateQuota","message":"Requests throttled"}"#;
        assert_eq!(
            parse_dashscope_event(line),
            Some(StreamItem::Error(StreamError {
                kind: StreamErrorKind::ProviderCallFailure,
                detail: "Error: Throttling.RateQuota - Requests throttled".to_string(),
            }))
        );
        assert_eq!(parse_dashscope_event(r#"{"usage":{"total_tokens":3}}"#), None);
    }

    #[test]
    fn test_format_dashscope_http_error() {
        let body = r#"{"code":"InvalidApiKey","message":"Invalid API-key provided."}"#;
        assert_eq!(
            format_dashscope_http_error(401, body),
            "Error: InvalidApiKey - Invalid API-key provided."
        );
        assert_eq!(
            format_dashscope_http_error(502, "Bad Gateway"),
            "Error: HTTP 502 - Bad Gateway"
        );
    }

    #[tokio::test]
    async fn test_dashscope_without_any_key_yields_single_fragment() {
        let config = LlmConfig::default();
        let items: Vec<StreamItem> = stream_chat(&config, vec![user_message("hi")], None)
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Error(err) => {
                assert_eq!(err.kind, StreamErrorKind::MissingCredential);
                assert!(err.detail.contains("DashScope API Key is missing"));
            }
            other => panic!("expected missing-credential error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_family_has_no_fallback_key() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
        };
        // 进程级回退密钥只属于 dashscope 家族
        let items: Vec<StreamItem> =
            stream_chat(&config, vec![user_message("hi")], Some("sk-fallback"))
                .collect()
                .await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Error(err) => {
                assert_eq!(err.kind, StreamErrorKind::MissingCredential);
                assert!(err.detail.contains("openai"));
            }
            other => panic!("expected missing-credential error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_provider_yields_single_named_fragment() {
        let config = LlmConfig {
            provider: "unsupported_x".to_string(),
            ..LlmConfig::default()
        };
        let items: Vec<StreamItem> = stream_chat(&config, vec![user_message("hi")], None)
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Error(err) => {
                assert_eq!(err.kind, StreamErrorKind::UnsupportedProvider);
                assert!(err.detail.contains("unsupported_x"));
            }
            other => panic!("expected unsupported-provider error, got {:?}", other),
        }
    }
}
