//! 命令行 REPL：逐行读取用户输入，驱动编排循环，并把过程事件实时打印给操作员
//!
//! 空行忽略；`exit` 或输入结束（EOF）时退出。模型请求失败只打印错误，回到等待输入。

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::agent::AgentComponents;
use crate::llm::ChatTool;
use crate::react::{ReactEvent, TurnOutcome};

/// 启动提示：列出已加载的工具名
pub fn ready_banner(tools: &[ChatTool]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
    format!("🚀 Ready! Tools: [{}]. Type 'exit' to quit.", names.join(", "))
}

/// 事件 -> 操作员可读文本；不需要展示的事件返回 None
pub fn render_event(ev: &ReactEvent) -> Option<String> {
    let line = match ev {
        ReactEvent::ToolsReady { tools } => format!("🔧 Tools: {}", tools.join(", ")),
        ReactEvent::Thinking { .. } => return None,
        ReactEvent::ToolCall { tool, args, code } => {
            let mut s = format!("🛠️  Tool Call: {} {}", tool, args);
            if let Some(code) = code {
                s.push_str(&format!("\n💻 Code:\n{}", code));
            }
            s
        }
        ReactEvent::Observation { preview, .. } => format!("✅ Result: {}", preview),
        ReactEvent::ToolFailure { tool, reason } => format!("⚠️  {} failed: {}", tool, reason),
        ReactEvent::NormalizeWarning { text } => format!("⚠️  {}", text),
        ReactEvent::RoundLimit { rounds } => {
            format!("⚠️  Tool round limit ({}) reached; remaining calls skipped", rounds)
        }
        ReactEvent::Message { text } => format!("\n🤖 Assistant: {}", text),
        ReactEvent::Error { text } => format!("❌ Error: {}", text),
    };
    Some(line)
}

fn print_event<W: Write>(out: &mut W, ev: &ReactEvent) -> std::io::Result<()> {
    if let Some(line) = render_event(ev) {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// 运行 REPL 直到 exit 或输入结束
pub async fn run_repl<R, W>(agent: &mut AgentComponents, input: R, out: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let AgentComponents {
        orchestrator,
        history,
        ..
    } = agent;
    let (tx, mut rx) = mpsc::unbounded_channel::<ReactEvent>();
    let mut lines = input.lines();

    loop {
        write!(out, "\nUser: ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            tracing::info!("input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = {
            let turn = orchestrator.run_turn(history, &line, Some(&tx));
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    biased;
                    Some(ev) = rx.recv() => print_event(out, &ev)?,
                    res = &mut turn => break res,
                }
            }
        };
        while let Ok(ev) = rx.try_recv() {
            print_event(out, &ev)?;
        }

        match outcome {
            Ok(TurnOutcome::Exit) => break,
            Ok(TurnOutcome::Answer(_)) => {}
            // 错误事件已打印；历史未被改动，继续等待下一行
            Err(e) => tracing::debug!(error = %e, "turn discarded"),
        }
    }
    Ok(())
}
