use serde::{Deserialize, Serialize};

/**
 * \brief 聊天消息，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

/**
 * \brief 单次请求携带的模型服务配置。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /** \brief Provider 类型：dashscope/openai/deepseek/moonshot/claude/gemini */
    #[serde(default = "default_provider")]
    pub provider: String,
    /** \brief 模型名 */
    #[serde(default = "default_model")]
    pub model: String,
    /** \brief API Key（可选，dashscope 可回退到进程级密钥） */
    #[serde(default)]
    pub api_key: Option<String>,
    /** \brief API 基地址覆盖（可选，默认使用 Provider 官方端点） */
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "dashscope".to_string()
}

fn default_model() -> String {
    "qwen-turbo".to_string()
}

/**
 * \brief 聊天接口请求体。
 * \details 顶层 `api_key` 为旧版平铺字段，仅在结构化配置未提供密钥时生效。
 */
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /** \brief 会话消息序列，顺序有语义。 */
    pub messages: Vec<ChatMessage>,
    /** \brief 结构化模型服务配置（可选，缺省取默认值）。 */
    #[serde(default)]
    pub config: Option<LlmConfig>,
    /** \brief 已废弃的平铺 API Key。 */
    #[serde(default)]
    pub api_key: Option<String>,
}

/**
 * \brief 流式输出的判别单元：正文片段或内联错误。
 * \details 错误不会中断 HTTP 层通道，上墙时与正文同渠道输出其可读文本；
 * 进程内调用方可按变体区分，无需匹配字符串。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /** \brief 一个增量正文片段，按 Provider 顺序原样转发。 */
    Text(String),
    /** \brief 一条内联错误，携带类别与可读描述。 */
    Error(StreamError),
}

impl StreamItem {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn error(kind: StreamErrorKind, detail: impl Into<String>) -> Self {
        Self::Error(StreamError {
            kind,
            detail: detail.into(),
        })
    }

    /** \brief 是否为错误单元。 */
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /**
     * \brief 转为线上传输文本：正文原样，错误取可读描述。
     */
    pub fn into_wire_text(self) -> String {
        match self {
            Self::Text(content) => content,
            Self::Error(err) => err.detail,
        }
    }
}

/**
 * \brief 内联错误单元。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    /** \brief 错误类别。 */
    pub kind: StreamErrorKind,
    /** \brief 面向用户的可读描述（部分为本地化文案）。 */
    pub detail: String,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.detail)
    }
}

/**
 * \brief 适配器边界收敛出的封闭错误类别集合。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamErrorKind {
    /** \brief 所选 Provider 家族没有可用的 API Key。 */
    #[error("missing credential")]
    MissingCredential,
    /** \brief Provider 名称不在分发表内。 */
    #[error("unsupported provider")]
    UnsupportedProvider,
    /** \brief Provider 返回非成功状态或错误码。 */
    #[error("provider call failure")]
    ProviderCallFailure,
    /** \brief 调用建立或迭代过程中的传输异常。 */
    #[error("transport exception")]
    TransportException,
}
