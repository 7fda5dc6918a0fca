//! Terminal value transforms, applied on the emission boundary only.
//
//  The set is closed; an unknown name is identity. Every transform is O(1)
//  in the value size with a hard cap, so a hostile query cannot turn a
//  cheap projection into an expensive one.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::value::{JsonValue, Number};

/// Hard cap on `substring` extraction length.
const SUBSTRING_MAX_LEN: usize = 10_000;
/// `formatNumber` fractional digits are clamped to 0..=20.
const FORMAT_DECIMALS_MAX: i64 = 20;

pub static KNOWN_DIRECTIVES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["alias", "coerce", "default", "formatNumber", "substring"]
        .into_iter()
        .collect()
});

/// One parsed `@name(arg: value, ...)` application.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<(String, JsonValue)>,
}

impl Directive {
    pub fn new(name: impl Into<String>, args: Vec<(String, JsonValue)>) -> Directive {
        Directive {
            name: name.into(),
            args,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&JsonValue> {
        self.args.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn num_arg(&self, name: &str) -> Option<f64> {
        match self.arg(name) {
            Some(JsonValue::Number(n)) => Some(n.as_f64()),
            _ => None,
        }
    }

    fn str_arg(&self, name: &str) -> Option<&str> {
        match self.arg(name) {
            Some(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    fn apply(&self, value: JsonValue) -> JsonValue {
        match self.name.as_str() {
            // The alias is consumed by the engine's key resolution; at
            // transform time it is a no-op.
            "alias" => value,
            "coerce" => coerce(self.str_arg("type"), value),
            "default" => {
                if value.is_null() {
                    self.arg("value").cloned().unwrap_or(JsonValue::Null)
                } else {
                    value
                }
            }
            "formatNumber" => {
                let dec = (self.num_arg("dec").unwrap_or(0.0) as i64)
                    .clamp(0, FORMAT_DECIMALS_MAX);
                match value {
                    JsonValue::Number(Number::Float(f)) => {
                        let p = 10f64.powi(dec as i32);
                        JsonValue::Number(Number::Float((f * p).round() / p))
                    }
                    other => other,
                }
            }
            "substring" => match value {
                JsonValue::String(s) => {
                    let start = self.num_arg("start").unwrap_or(0.0).max(0.0) as usize;
                    let len = (self.num_arg("len").unwrap_or(SUBSTRING_MAX_LEN as f64)
                        as i64)
                        .clamp(0, SUBSTRING_MAX_LEN as i64) as usize;
                    JsonValue::String(s.chars().skip(start).take(len).collect())
                }
                other => other,
            },
            // Unknown directive: documented non-error, identity.
            _ => value,
        }
    }
}

pub fn is_known(name: &str) -> bool {
    KNOWN_DIRECTIVES.contains(name)
}

/// Compose a directive chain left-to-right.
pub fn apply_chain(directives: &[Directive], value: JsonValue) -> JsonValue {
    directives.iter().fold(value, |v, d| d.apply(v))
}

fn coerce(target: Option<&str>, value: JsonValue) -> JsonValue {
    match target {
        Some("number") => match value {
            JsonValue::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    JsonValue::Number(Number::Integer(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    JsonValue::Number(Number::Float(f))
                } else {
                    JsonValue::String(s)
                }
            }
            JsonValue::Boolean(b) => JsonValue::Number(Number::Integer(b as i64)),
            other => other,
        },
        Some("string") => match value {
            JsonValue::Number(Number::Integer(i)) => JsonValue::String(i.to_string()),
            JsonValue::Number(Number::Float(f)) => JsonValue::String(f.to_string()),
            JsonValue::Boolean(b) => JsonValue::String(b.to_string()),
            other => other,
        },
        // Unknown coercion target: identity.
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str, args: &[(&str, JsonValue)]) -> Directive {
        Directive::new(
            name,
            args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        )
    }

    #[test]
    fn coerce_string_to_number() {
        let d = dir("coerce", &[("type", JsonValue::String("number".into()))]);
        assert_eq!(
            apply_chain(&[d], JsonValue::String("25".into())),
            JsonValue::Number(Number::Integer(25))
        );
    }

    #[test]
    fn coerce_unknown_type_is_identity() {
        let d = dir("coerce", &[("type", JsonValue::String("banana".into()))]);
        let v = JsonValue::String("25".into());
        assert_eq!(apply_chain(&[d], v.clone()), v);
    }

    #[test]
    fn coerce_unparseable_passes_through() {
        let d = dir("coerce", &[("type", JsonValue::String("number".into()))]);
        let v = JsonValue::String("not a number".into());
        assert_eq!(apply_chain(&[d], v.clone()), v);
    }

    #[test]
    fn substring_caps_and_slices() {
        let d = dir(
            "substring",
            &[
                ("start", JsonValue::Number(Number::Integer(0))),
                ("len", JsonValue::Number(Number::Integer(10))),
            ],
        );
        assert_eq!(
            apply_chain(
                &[d],
                JsonValue::String("Full-stack developer from Gwenborough".into())
            ),
            JsonValue::String("Full-stack".into())
        );
    }

    #[test]
    fn substring_negative_start_clamps_to_zero() {
        let d = dir(
            "substring",
            &[
                ("start", JsonValue::Number(Number::Integer(-5))),
                ("len", JsonValue::Number(Number::Integer(2))),
            ],
        );
        assert_eq!(
            apply_chain(&[d], JsonValue::String("ab".into())),
            JsonValue::String("ab".into())
        );
    }

    #[test]
    fn default_replaces_null_only() {
        let d = dir("default", &[("value", JsonValue::String("N/A".into()))]);
        assert_eq!(
            apply_chain(&[d.clone()], JsonValue::Null),
            JsonValue::String("N/A".into())
        );
        assert_eq!(
            apply_chain(&[d], JsonValue::Number(Number::Integer(1))),
            JsonValue::Number(Number::Integer(1))
        );
    }

    #[test]
    fn format_number_rounds_floats() {
        let d = dir("formatNumber", &[("dec", JsonValue::Number(Number::Integer(2)))]);
        assert_eq!(
            apply_chain(&[d], JsonValue::Number(Number::Float(3.14159))),
            JsonValue::Number(Number::Float(3.14))
        );
    }

    #[test]
    fn chains_compose_left_to_right() {
        let coerce = dir("coerce", &[("type", JsonValue::String("string".into()))]);
        let cut = dir(
            "substring",
            &[
                ("start", JsonValue::Number(Number::Integer(0))),
                ("len", JsonValue::Number(Number::Integer(2))),
            ],
        );
        assert_eq!(
            apply_chain(&[coerce, cut], JsonValue::Number(Number::Integer(1234))),
            JsonValue::String("12".into())
        );
    }

    #[test]
    fn unknown_directive_is_identity() {
        let d = dir("uppercase", &[]);
        let v = JsonValue::String("x".into());
        assert_eq!(apply_chain(&[d], v.clone()), v);
        assert!(!is_known("uppercase"));
    }
}
