use anyhow::Result;
use regex::{Captures, Regex};
use std::env;
use tracing::{debug, warn};

const PLACEHOLDER: &str = r"\$\{(\w+)\}|\$(\w+)";

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
///
/// Unset variables keep their placeholder so validation can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(PLACEHOLDER)?;
    let mut missing = Vec::new();

    let result = re.replace_all(content, |caps: &Captures| {
        let whole = caps[0].to_string();
        let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return whole;
        };
        match env::var(name) {
            Ok(value) => {
                debug!(var = name, "Substituted environment variable");
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", name);
                missing.push(name.to_string());
                whole
            }
        }
    });

    if !missing.is_empty() {
        debug!(?missing, "Unresolved environment variables left for validation");
    }
    Ok(result.into_owned())
}

/// Names of placeholders still present in `content`
pub fn unresolved_env_vars(content: &str) -> Vec<String> {
    let Ok(re) = Regex::new(PLACEHOLDER) else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string()))
        .collect()
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    !unresolved_env_vars(content).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_set_and_keeps_unset() {
        env::set_var("LEDGER_TEST_DB_HOST", "db.internal");
        let out = substitute_env_vars(
            "url: postgres://${LEDGER_TEST_DB_HOST}/ledger?x=$LEDGER_TEST_UNSET_VAR",
        )
        .unwrap();
        assert_eq!(out, "url: postgres://db.internal/ledger?x=$LEDGER_TEST_UNSET_VAR");
        assert_eq!(unresolved_env_vars(&out), vec!["LEDGER_TEST_UNSET_VAR".to_string()]);
    }

    #[test]
    fn test_no_placeholders() {
        assert!(!has_unresolved_env_vars("backend: memory"));
    }
}
