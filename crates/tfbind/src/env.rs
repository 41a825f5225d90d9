use std::env;
use std::sync::OnceLock;

static TFBIND_RUNTIME: OnceLock<String> = OnceLock::new();
static TFBIND_LOG_OPS: OnceLock<bool> = OnceLock::new();

const DEFAULT_RUNTIME: &str = "ref";

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Runtime created by [`crate::runtime::registry::default_runtime`].
pub(crate) fn default_runtime_name() -> &'static str {
    TFBIND_RUNTIME.get_or_init(|| match env::var("TFBIND_RUNTIME") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => DEFAULT_RUNTIME.to_string(),
    })
}

/// When set, scopes log every appended operation at info level.
pub(crate) fn log_ops_enabled() -> bool {
    *TFBIND_LOG_OPS.get_or_init(|| match env::var("TFBIND_LOG_OPS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn bool_flags() {
        assert!(parse_bool(" Yes "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
    }
}
