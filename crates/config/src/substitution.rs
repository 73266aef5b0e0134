use anyhow::Result;
use regex::Regex;
use std::env;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// `$$` (escaped dollar) or `${VAR}`.
fn substitution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\$|\$\{(\w+)\}").expect("substitution regex is valid"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\w+\}").expect("placeholder regex is valid"))
}

/// Substitute environment variables written as `${VAR_NAME}`.
///
/// A bare `$` is literal, so `pa$word` is left alone. `$$` produces a single
/// `$`, for values that must contain a literal `${...}`.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let mut missing_vars = Vec::new();

    let result = substitution_regex().replace_all(content, |caps: &regex::Captures<'_>| {
        let Some(var_name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };

        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                // Leave the placeholder for the validator to report.
                caps[0].to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (validation will flag them): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Check if a string still contains a `${VAR}` placeholder
pub fn has_unresolved_env_vars(content: &str) -> bool {
    placeholder_regex().is_match(content)
}
