//! Trace context sanitization
//!
//! Tool arguments often carry credentials. Before a context leaves the process
//! the sanitizer redacts values stored under sensitive keys and scrubs inline
//! secrets (`Bearer ...`, `api_key=...`) from string values.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Default replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

static BEARER_REGEX: OnceLock<Regex> = OnceLock::new();
static KEY_VALUE_REGEX: OnceLock<Regex> = OnceLock::new();

fn bearer_regex() -> &'static Regex {
    BEARER_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b(bearer)\s+[a-zA-Z0-9._~+/=-]+").expect("Invalid bearer regex")
    })
}

fn key_value_regex() -> &'static Regex {
    KEY_VALUE_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(password|passwd|pwd|token|api[_-]?key|apikey|secret|credentials?)(\s*[=:]\s*)["']?[^"'\s,;&}]+"#,
        )
        .expect("Invalid key/value regex")
    })
}

/// Sanitization configuration
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Enable sanitization
    pub enabled: bool,

    /// Key names whose values are always redacted. Matched against whole
    /// words of a key, so `api_key` covers `apiKey` and `X-API-Key` but
    /// `token` does not cover `max_tokens`.
    pub sensitive_keys: Vec<String>,

    /// Replacement string for sensitive data
    pub replacement: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitive_keys: [
                "password",
                "passwd",
                "pwd",
                "secret",
                "token",
                "api_key",
                "apikey",
                "authorization",
                "credential",
                "credentials",
                "private_key",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            replacement: REDACTED.to_string(),
        }
    }
}

/// Redacts credentials from trace contexts
#[derive(Debug, Clone, Default)]
pub struct ContextSanitizer {
    config: SanitizationConfig,
}

impl ContextSanitizer {
    /// Create a sanitizer with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sanitizer with a custom configuration
    pub fn with_config(config: SanitizationConfig) -> Self {
        Self { config }
    }

    /// Whether a key names a sensitive field
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let words = key_words(key);
        self.config.sensitive_keys.iter().any(|sensitive| {
            let needle = key_words(sensitive);
            !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
        })
    }

    /// Scrub inline secrets from a string
    pub fn sanitize_str(&self, value: &str) -> String {
        if !self.config.enabled {
            return value.to_string();
        }

        let replacement = &self.config.replacement;
        let sanitized = bearer_regex().replace_all(value, |caps: &regex::Captures| {
            format!("{} {}", &caps[1], replacement)
        });
        key_value_regex()
            .replace_all(&sanitized, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], &caps[2], replacement)
            })
            .into_owned()
    }

    /// Recursively sanitize a JSON value
    pub fn sanitize_value(&self, value: &Value) -> Value {
        if !self.config.enabled {
            return value.clone();
        }

        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.is_sensitive_key(key) {
                            self.redact_strings(value)
                        } else {
                            self.sanitize_value(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            Value::String(s) => Value::String(self.sanitize_str(s)),
            other => other.clone(),
        }
    }

    /// Replace every string below a sensitive key. Numbers, booleans and
    /// nulls stay readable so `max_tokens: 100` style settings survive.
    fn redact_strings(&self, value: &Value) -> Value {
        match value {
            Value::String(_) => Value::String(self.config.replacement.clone()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), self.redact_strings(value)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.redact_strings(v)).collect())
            }
            other => other.clone(),
        }
    }
}

/// Lowercase words of a key, split on separators and camelCase boundaries
fn key_words(key: &str) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // `userPassword` and the `K` in `APIKey` both start a new word
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }

        current.extend(c.to_lowercase());
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}
