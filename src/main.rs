//! Pilot - 本地工具驱动的数据分析助手
//!
//! 入口：初始化日志、加载配置、启动执行端并运行 REPL。
//! 用法：`pilot [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use pilot::agent::create_agent_components;
use pilot::config::load_config;
use pilot::observability;
use pilot::repl::{ready_banner, run_repl};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    // 执行端启动或握手失败直接退出
    let mut agent = create_agent_components(&cfg, None)
        .await
        .context("Failed to start agent")?;

    println!("{}", ready_banner(agent.orchestrator.tools()));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    run_repl(&mut agent, stdin, &mut stdout)
        .await
        .context("REPL failed")?;

    let (prompt, completion, total) = agent.llm.token_usage();
    tracing::info!(prompt, completion, total, "session finished");
    Ok(())
}
