//! One-shot validation of [`RealtimeConfig`].
//!
//! Fields are checked in a fixed order (`domain`, `token`, `url`) and the
//! first failing rule wins. `secure` is typed as a boolean and needs no rule.

use cozy_realtime_shared::{RealtimeError, Result};
use url::Url;

use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Must be present unless the other field is.
    RequiredUnless(&'static str),
    Required,
    /// Must parse as an absolute URL when present.
    Url,
}

const RULES: &[(&str, &[Rule])] = &[
    ("domain", &[Rule::RequiredUnless("url")]),
    ("token", &[Rule::Required]),
    ("url", &[Rule::RequiredUnless("domain"), Rule::Url]),
];

impl Rule {
    fn check(
        &self,
        value: Option<&str>,
        config: &RealtimeConfig,
    ) -> std::result::Result<(), String> {
        match self {
            Rule::Required if value.is_none() => Err("is required".to_string()),
            Rule::RequiredUnless(other) if value.is_none() && config.field(other).is_none() => {
                Err(format!("is required if no {} is provided", other))
            }
            Rule::Url => match value {
                Some(raw) => Url::parse(raw)
                    .map(|_| ())
                    .map_err(|e| format!("should be a URL ({})", e)),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Validate a configuration, naming the first offending field.
pub fn validate(config: &RealtimeConfig) -> Result<()> {
    for &(field, rules) in RULES {
        let value = config.field(field);
        for rule in rules.iter() {
            if let Err(message) = rule.check(value, config) {
                return Err(RealtimeError::Configuration { field, message });
            }
        }
    }
    Ok(())
}
