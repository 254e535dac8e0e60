//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vispet_core::config::GeneralConfig;

/// Install a fmt subscriber filtered at `general.log_level`. `RUST_LOG`
/// overrides the configured level. Returns `false` if a global subscriber
/// was already installed (the call is then a no-op).
pub fn init_tracing(general: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(general)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

fn filter_directive(general: &GeneralConfig) -> String {
    let level = general.log_level.trim();
    if level.is_empty() {
        "info".to_string()
    } else {
        format!("warn,vispet_core={level},vispet_server={level}")
    }
}
