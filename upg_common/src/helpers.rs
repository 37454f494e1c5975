use std::{env, fmt::Display, str::FromStr};

use log::warn;
use thiserror::Error;

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads a boolean flag from the environment variable `name`, falling back to `default` if it is unset or unreadable.
pub fn env_flag(name: &str, default: bool) -> bool {
    parse_boolean_flag(env::var(name).ok(), default)
}

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {name}: {reason}")]
pub struct EnvParseError {
    pub name: String,
    pub reason: String,
}

/// Reads and parses the environment variable `name`.
///
/// * Unset (or empty) variables yield `Ok(None)`.
/// * Values that fail to parse yield an [`EnvParseError`], so that callers can decide whether to log and fall back
///   to a default, or abort.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, EnvParseError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) if s.trim().is_empty() => Ok(None),
        Ok(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvParseError { name: name.to_string(), reason: format!("{s} ({e})") }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(s)) => {
            warn!("{name} is not valid unicode: {}", s.to_string_lossy());
            Err(EnvParseError { name: name.to_string(), reason: "not valid unicode".to_string() })
        },
    }
}
