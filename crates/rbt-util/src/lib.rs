use std::path::PathBuf;

pub mod output;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Installs the global fmt subscriber. `RUST_LOG` directives are honoured on
/// top of `level`.
pub fn init_tracing(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = if level.trim().is_empty() {
        DEFAULT_LOG_LEVEL.to_string()
    } else {
        level.trim().to_ascii_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .with_target(true)
        .init();
    Ok(())
}
