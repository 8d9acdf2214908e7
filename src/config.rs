//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;
use crate::session::McpTimeouts;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
}

/// [app] 段：系统提示词、工具轮数上限、预览长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub system_prompt: String,
    /// 每次用户输入最多执行的工具轮数（1 即只追问一次）
    pub max_tool_rounds: usize,
    /// Observation 预览字符数
    pub preview_chars: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            system_prompt: "You are a Data Analyst using local tools.".to_string(),
            max_tool_rounds: 5,
            preview_chars: 200,
        }
    }
}

/// 模型后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Mock,
}

/// [llm] 段：后端选择、端点与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    /// 未设置时依次回退到 OPENAI_API_KEY 与 "dummy"
    pub api_key: Option<String>,
    pub timeouts: LlmTimeoutsSection,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "http://localhost:11234/v1".to_string(),
            model: "gemma-3-4b".to_string(),
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
            max_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl LlmSection {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            timeout: Duration::from_secs(self.timeouts.request),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// 执行端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// 子进程 MCP 服务（stdio）
    #[default]
    Mcp,
    /// 进程内工具（离线运行）
    Local,
}

/// [session] 段：MCP 服务启动命令与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub kind: SessionKind,
    pub command: String,
    pub args: Vec<String>,
    /// 额外注入子进程的环境变量
    pub env: HashMap<String, String>,
    pub request_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            kind: SessionKind::Mcp,
            command: "pdm".to_string(),
            args: vec![
                "run".to_string(),
                "python".to_string(),
                "packages/pandas-analyst/src/server.py".to_string(),
            ],
            env: HashMap::new(),
            request_timeout_secs: 30,
            handshake_timeout_secs: 30,
        }
    }
}

impl SessionSection {
    pub fn mcp_timeouts(&self) -> McpTimeouts {
        McpTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
            ..McpTimeouts::default()
        }
    }
}

/// [tools] 段：围栏代码工具、数据目录、工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 围栏代码块映射到的工具名
    pub code_tool: String,
    /// 该工具接收代码的参数名
    pub code_argument: String,
    /// filepath 参数被限制到的目录
    pub data_dir: String,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 本地 read_file 工具的最大返回字符数
    pub max_read_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            code_tool: "execute_pandas_code".to_string(),
            code_argument: "code".to_string(),
            data_dir: "data".to_string(),
            tool_timeout_secs: 120,
            max_read_chars: 8000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键；文件不存在时报错）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
