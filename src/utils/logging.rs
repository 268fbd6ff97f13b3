use crate::utils::toml_config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(level: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level };
    format!("lexio={level},lexio_server={level},tower_http={level}")
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns an error if a subscriber is already installed.
pub fn init(level: &str, format: LogFormat, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level, verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(
            default_directive("warn", false),
            "lexio=warn,lexio_server=warn,tower_http=warn"
        );
        assert!(default_directive("warn", true).starts_with("lexio=debug"));
    }
}
