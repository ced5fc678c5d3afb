use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs a compact fmt subscriber filtered by `RUST_LOG` (default `info`).
#[cfg(feature = "logging")]
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    let ansi = ansi_enabled();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_decode() -> String {
    if ansi_enabled() {
        format!("{}", "DECODE".bright_blue().bold())
    } else {
        "DECODE".to_string()
    }
}

pub fn category_ir() -> String {
    if ansi_enabled() {
        format!("{}", "IR".bright_cyan().bold())
    } else {
        "IR".to_string()
    }
}

pub fn category_select() -> String {
    if ansi_enabled() {
        format!("{}", "SELECT".bright_green().bold())
    } else {
        "SELECT".to_string()
    }
}

pub fn category_layout() -> String {
    if ansi_enabled() {
        format!("{}", "LAYOUT".bright_magenta().bold())
    } else {
        "LAYOUT".to_string()
    }
}

pub fn routine_label(name: &str) -> String {
    if ansi_enabled() {
        format!("{}", name.bright_white())
    } else {
        name.to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stdout).is_some()
}
