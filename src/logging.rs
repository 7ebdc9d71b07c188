use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "SMARTDO_LOG";

#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    /// Append to a file. Used while the terminal belongs to the TUI.
    File(PathBuf),
}

pub fn init(target: LogTarget, verbose: bool) -> Result<()> {
    let filter = env_filter(std::env::var(LOG_ENV).ok(), verbose);
    match target {
        LogTarget::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {:?}", path))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// `--verbose` wins over the environment; otherwise the environment
/// directive applies, falling back to `warn`.
fn env_filter(directive: Option<String>, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn verbose_overrides_environment() {
        let hint = |f: EnvFilter| f.max_level_hint();
        assert_eq!(hint(env_filter(None, false)), Some(LevelFilter::WARN));
        assert_eq!(hint(env_filter(Some("info".into()), false)), Some(LevelFilter::INFO));
        assert_eq!(hint(env_filter(Some("info".into()), true)), Some(LevelFilter::DEBUG));
    }
}
