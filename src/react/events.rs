//! 编排过程事件：供 REPL 等前端实时展示工具调用、观察与回复（诊断旁路，不写入历史）

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 执行端工具清单已加载
    ToolsReady { tools: Vec<String> },
    /// 正在请求模型；round 为已完成的工具轮数
    Thinking { round: usize },
    /// 即将派发工具（执行前回显原始参数；围栏代码工具额外带上代码）
    ToolCall {
        tool: String,
        args: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败（错误文本已作为结果交给模型）
    ToolFailure { tool: String, reason: String },
    /// 归一化过程中的非致命问题（如 [TOOL_CALLS] 负载解析失败）
    NormalizeWarning { text: String },
    /// 达到工具轮数上限，剩余调用不再派发
    RoundLimit { rounds: usize },
    /// 本轮最终回复
    Message { text: String },
    /// 错误
    Error { text: String },
}
