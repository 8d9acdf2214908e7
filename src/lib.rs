//! Pilot - 本地工具驱动的数据分析助手
//!
//! 模块划分：
//! - **agent**: 按配置组装 Chat Model、Execution Session 与编排循环
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **llm**: Chat Model 抽象与实现（OpenAI 兼容 / Mock / 超时重试包装）
//! - **memory**: 只追加的对话历史
//! - **react**: Call-Form Normalizer、编排主循环、过程事件
//! - **repl**: 命令行交互
//! - **session**: Execution Session（MCP stdio / 进程内工具）
//! - **tools**: Schema Adapter、Argument Sanitizer、执行器与本地工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod repl;
pub mod session;
pub mod tools;
