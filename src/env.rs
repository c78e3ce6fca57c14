//! Environment variable substitution for configuration files
//!
//! Credentials and bucket names are usually injected through the
//! environment (`FTP_USER`, `FTP_PASSWD`, `S3_BUCKET_NAME`, ...). A config
//! file references them with `${VAR_NAME}` and the whole document is
//! expanded before it is parsed.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;

use crate::config::ConfigError;

/// Matches `${VAR_NAME}` references
static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

/// Expand every `${VAR}` in `input` from the process environment.
///
/// Fails with a single error naming every unset variable, in order of first
/// appearance.
pub fn expand_env(input: &str) -> Result<String, ConfigError> {
    expand_with(input, |name| env::var(name).ok())
}

/// Expand `${VAR}` references using an arbitrary lookup.
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Vec<String> = Vec::new();

    let expanded = ENV_REF.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv(missing));
    }

    Ok(expanded.into_owned())
}
