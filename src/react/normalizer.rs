//! Call-Form Normalizer：把一个 assistant turn 归一为 Tool Invocation 序列或最终回复
//!
//! 不同模型表达「调用工具」的方式互不兼容，按固定优先级尝试，第一个产出非空结果的策略胜出：
//! 1. 后端原生 tool_calls（保留 id / 顺序，缺 id 时按位置补 call_<i>；参数解析失败推迟到派发时报告）
//! 2. 文本中的 `[TOOL_CALLS]` 标记后跟 JSON 数组（Mistral 风格），合成 call_0, call_1, ...
//! 3. 最后一个 ``` 围栏代码块，作为固定的「执行代码」工具的唯一参数
//!
//! 各策略都是纯函数，互不混用检测逻辑；相同输入永远得到相同输出。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::llm::AssistantTurn;
use crate::tools::{Arguments, ToolInvocation};

/// 内联调用标记
pub const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";

/// 命中的识别策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Native,
    BracketTag,
    FencedCode,
}

/// 单轮识别结果：要么一串调用，要么最终回复（原文）
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Invocations {
        strategy: Strategy,
        invocations: Vec<ToolInvocation>,
    },
    FinalAnswer(String),
}

/// 识别结果 + 给操作员的非致命诊断（如内联 JSON 解析失败）
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub outcome: RecognitionOutcome,
    pub warnings: Vec<String>,
}

/// 策略 1：原生 tool_calls 逐个映射；后端省略 id 时用位置 id，保证同一轮内 id 唯一
pub fn native_invocations(turn: &AssistantTurn) -> Option<Vec<ToolInvocation>> {
    if turn.native_calls.is_empty() {
        return None;
    }
    Some(
        turn.native_calls
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let id = if c.id.is_empty() {
                    ToolInvocation::positional_id(i)
                } else {
                    c.id.clone()
                };
                ToolInvocation::new(id, &c.name, Arguments::from_json_text(&c.arguments))
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct BracketCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// 策略 2：`[TOOL_CALLS]` 之后的 JSON 数组。
/// Ok(None) 表示没有标记或数组为空；Err 为解析失败原因（调用方记录后继续降级）。
pub fn bracket_invocations(text: &str) -> Result<Option<Vec<ToolInvocation>>, String> {
    let Some(pos) = text.find(TOOL_CALLS_MARKER) else {
        return Ok(None);
    };
    let payload = text[pos + TOOL_CALLS_MARKER.len()..].trim_start();
    // 只取第一个 JSON 值，忽略其后的杂项（如 </s>）
    let calls: Vec<BracketCall> = serde_json::Deserializer::from_str(payload)
        .into_iter::<Vec<BracketCall>>()
        .next()
        .ok_or_else(|| "empty payload after [TOOL_CALLS]".to_string())?
        .map_err(|e| format!("malformed [TOOL_CALLS] payload: {e}"))?;
    if calls.is_empty() {
        return Ok(None);
    }
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            let arguments = Arguments::from_value(call.arguments)
                .map_err(|e| format!("malformed [TOOL_CALLS] arguments for {}: {e}", call.name))?;
            Ok(ToolInvocation::new(
                ToolInvocation::positional_id(i),
                call.name,
                arguments,
            ))
        })
        .collect::<Result<Vec<_>, String>>()
        .map(Some)
}

fn fence_regex() -> &'static Regex {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    // 可选语言标签（必须独占一行），内容非贪婪匹配到下一个 ```
    FENCE_RE.get_or_init(|| Regex::new(r"```(?:[^\n`]*\n)?([\s\S]*?)```").expect("valid fence regex"))
}

/// 策略 3：最后一个围栏代码块的内容（去首尾空白）
pub fn last_fenced_block(text: &str) -> Option<String> {
    fence_regex()
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// 持有围栏策略对应的工具名与参数名（如 execute_pandas_code / code）
#[derive(Debug, Clone)]
pub struct CallFormNormalizer {
    code_tool: String,
    code_argument: String,
}

impl CallFormNormalizer {
    pub fn new(code_tool: impl Into<String>, code_argument: impl Into<String>) -> Self {
        Self {
            code_tool: code_tool.into(),
            code_argument: code_argument.into(),
        }
    }

    pub fn code_tool(&self) -> &str {
        &self.code_tool
    }

    pub fn code_argument(&self) -> &str {
        &self.code_argument
    }

    fn code_invocation(&self, code: String) -> ToolInvocation {
        let mut args = Map::new();
        args.insert(self.code_argument.clone(), Value::String(code));
        ToolInvocation::new(
            ToolInvocation::positional_id(0),
            &self.code_tool,
            Arguments::from_map(args),
        )
    }

    /// 对一个 assistant turn 依次尝试三种策略
    pub fn normalize(&self, turn: &AssistantTurn) -> Recognition {
        let mut warnings = Vec::new();
        let found = |strategy, invocations| RecognitionOutcome::Invocations {
            strategy,
            invocations,
        };

        let outcome = if let Some(invocations) = native_invocations(turn) {
            found(Strategy::Native, invocations)
        } else {
            let bracket = match bracket_invocations(&turn.text) {
                Ok(calls) => calls,
                Err(reason) => {
                    warnings.push(reason);
                    None
                }
            };
            match bracket {
                Some(invocations) => found(Strategy::BracketTag, invocations),
                None => match last_fenced_block(&turn.text) {
                    Some(code) => found(Strategy::FencedCode, vec![self.code_invocation(code)]),
                    None => RecognitionOutcome::FinalAnswer(turn.text.clone()),
                },
            }
        };

        Recognition { outcome, warnings }
    }
}
