//! 可观测性：tracing 订阅器初始化
//!
//! 日志写 stderr，避免与 stdout 上的操作员输出交错；默认 info，可通过 RUST_LOG 覆盖。

use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

fn default_directive() -> Directive {
    tracing::Level::INFO.into()
}

pub fn init() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(default_directive())
                .from_env_lossy(),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
