use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or empty.
pub const DEFAULT_LOG_FILTER: &str = "coverhub=info";

/// Builds the log filter from `RUST_LOG`-style directives. Directives given
/// here replace the default entirely; unparseable ones fall back to it.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_default_filter() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("  ")).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_rust_log_overrides_crate_level() {
        let filter = log_filter(Some("coverhub=debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let filter = log_filter(Some("coverhub=warn"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }
}
