//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info，可通过 RUST_LOG 覆盖；verbose 时研究相关模块提升到 debug
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = if verbose {
            "info,bee_research::research=debug,bee_research::core=debug,bee_research::tools=debug"
        } else {
            "info"
        };
        EnvFilter::new(directives)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
