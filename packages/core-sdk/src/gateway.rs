use crate::knowledge::KnowledgeCorpus;
use crate::llm::{self, FragmentStream};
use crate::models::{ChatMessage, ChatRequest, LlmConfig};
use crate::prompt;
use crate::telemetry;

/** \brief 进程级回退 DashScope 密钥的环境变量。 */
pub const FALLBACK_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/**
 * \brief 聊天网关：请求入口的编排者。
 * \details 启动时构造一次，持有组装好的系统提示与可选的进程级回退
 * 密钥，之后只读。每个请求在这里完成配置缺省、旧版平铺密钥合并、
 * 系统提示前插，再交给路由层分发。
 */
#[derive(Debug, Clone)]
pub struct ChatGateway {
    system_prompt: String,
    fallback_key: Option<String>,
}

impl ChatGateway {
    /**
     * \brief 用注入的知识库与回退密钥构造网关。
     */
    pub fn new(corpus: &KnowledgeCorpus, fallback_key: Option<String>) -> Self {
        Self {
            system_prompt: prompt::compose_system_prompt(corpus),
            fallback_key: fallback_key.filter(|k| !k.is_empty()),
        }
    }

    /**
     * \brief 从环境读取回退密钥并构造网关。
     */
    pub fn from_env(corpus: &KnowledgeCorpus) -> Self {
        Self::new(corpus, std::env::var(FALLBACK_KEY_ENV).ok())
    }

    /** \brief 组装好的系统提示（调用方不可覆盖）。 */
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /**
     * \brief 合并请求配置：缺省取默认值，旧版平铺 api_key 仅在结构化
     * 配置未提供密钥时并入（结构化值优先）。
     */
    pub fn effective_config(
        config: Option<LlmConfig>,
        legacy_api_key: Option<String>,
    ) -> LlmConfig {
        let mut config = config.unwrap_or_default();
        let legacy = legacy_api_key.filter(|k| !k.is_empty());
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            config.api_key = legacy;
        }
        config
    }

    /**
     * \brief 处理一次聊天请求，返回可直接转发给传输层的片段流。
     */
    pub fn chat_stream(&self, request: ChatRequest) -> FragmentStream {
        let config = Self::effective_config(request.config, request.api_key);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
        });
        messages.extend(request.messages);

        telemetry::log_event(
            "gateway.chat",
            &format!(
                "provider={} model={} msgs={}",
                config.provider,
                config.model,
                messages.len()
            ),
        );

        llm::stream_chat(&config, messages, self.fallback_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StreamErrorKind, StreamItem};
    use futures_util::StreamExt;

    #[test]
    fn test_effective_config_defaults() {
        let config = ChatGateway::effective_config(None, None);
        assert_eq!(config.provider, "dashscope");
        assert_eq!(config.model, "qwen-turbo");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_legacy_flat_key_merged_when_config_has_none() {
        let config = ChatGateway::effective_config(None, Some("sk-legacy".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-legacy"));
    }

    #[test]
    fn test_structured_key_wins_over_legacy() {
        let structured = LlmConfig {
            api_key: Some("sk-structured".to_string()),
            ..LlmConfig::default()
        };
        let config =
            ChatGateway::effective_config(Some(structured), Some("sk-legacy".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-structured"));
    }

    #[test]
    fn test_empty_structured_key_treated_as_absent() {
        let structured = LlmConfig {
            api_key: Some(String::new()),
            ..LlmConfig::default()
        };
        let config =
            ChatGateway::effective_config(Some(structured), Some("sk-legacy".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-legacy"));
    }

    #[test]
    fn test_system_prompt_composed_once_from_corpus() {
        let gateway = ChatGateway::new(&KnowledgeCorpus::default(), None);
        assert!(gateway.system_prompt().contains("NetCraft AI"));
        assert!(gateway.system_prompt().contains("update_topology"));
    }

    #[tokio::test]
    async fn test_unsupported_provider_short_circuits_at_gateway() {
        let gateway = ChatGateway::new(&KnowledgeCorpus::default(), None);
        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            config: Some(LlmConfig {
                provider: "unsupported_x".to_string(),
                ..LlmConfig::default()
            }),
            api_key: None,
        };
        let items: Vec<StreamItem> = gateway.chat_stream(request).collect().await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Error(err) => assert_eq!(err.kind, StreamErrorKind::UnsupportedProvider),
            other => panic!("expected unsupported-provider error, got {:?}", other),
        }
    }
}
