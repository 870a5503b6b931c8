//! 構造化ログの初期化。
//! tracing-subscriber を使い、JSON またはプレーンテキストで出力する。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// init は tracing-subscriber を初期化する。
/// `RUST_LOG` が設定されていればそちらを優先する。
pub fn init(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if log_format == "text" {
        registry
            .with(fmt::layer().with_target(true))
            .init();
    } else {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    }
}
