//! `${VAR}` expansion.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::warn;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(\$?)\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid variable pattern")
    })
}

/// Looks variables up in the process environment.
#[must_use]
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Replaces every `${NAME}` with `lookup(NAME)`.
///
/// Unset variables expand to an empty string. `$${NAME}` is kept as the
/// literal `${NAME}`.
pub fn expand_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    var_pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[2];
            if !caps[1].is_empty() {
                return format!("${{{name}}}");
            }
            lookup(name).unwrap_or_else(|| {
                warn!(variable = %name, "Configuration references an unset variable");
                String::new()
            })
        })
        .into_owned()
}

/// Expands every string inside a TOML value in place.
pub(crate) fn expand_value(value: &mut toml::Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        toml::Value::String(s) => {
            if s.contains('$') {
                *s = expand_vars(s, lookup);
            }
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_value(item, lookup);
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_value(item, lookup);
            }
        }
        _ => {}
    }
}
