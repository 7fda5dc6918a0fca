//! In-memory JSON values built by the projection engine.
//
//  Objects keep insertion order so a projection preserves the field order
//  of its source document.

use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Object(IndexMap<String, JsonValue>),
    Array(Vec<JsonValue>),
    String(String),
    Number(Number),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl JsonValue {
    pub fn new_container(is_array: bool) -> JsonValue {
        if is_array {
            JsonValue::Array(Vec::new())
        } else {
            JsonValue::Object(IndexMap::new())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, JsonValue>> {
        match self {
            JsonValue::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<JsonValue>> {
        match self {
            JsonValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Serialize without any whitespace.
    pub fn to_compact_string(&self) -> String {
        let mut out = String::with_capacity(64);
        self.write_compact(&mut out);
        out
    }

    /// Serialize with two-space indentation.
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::with_capacity(64);
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_compact(&self, out: &mut String) {
        match self {
            JsonValue::Object(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_string(k, out);
                    out.push(':');
                    v.write_compact(out);
                }
                out.push('}');
            }
            JsonValue::Array(arr) => {
                out.push('[');
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    v.write_compact(out);
                }
                out.push(']');
            }
            JsonValue::String(s) => write_string(s, out),
            JsonValue::Number(n) => write_number(*n, out),
            JsonValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            JsonValue::Null => out.push_str("null"),
        }
    }

    fn write_pretty(&self, out: &mut String, depth: usize) {
        match self {
            JsonValue::Object(map) if !map.is_empty() => {
                out.push_str("{\n");
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(",\n");
                    }
                    indent(out, depth + 1);
                    write_string(k, out);
                    out.push_str(": ");
                    v.write_pretty(out, depth + 1);
                }
                out.push('\n');
                indent(out, depth);
                out.push('}');
            }
            JsonValue::Array(arr) if !arr.is_empty() => {
                out.push_str("[\n");
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        out.push_str(",\n");
                    }
                    indent(out, depth + 1);
                    v.write_pretty(out, depth + 1);
                }
                out.push('\n');
                indent(out, depth);
                out.push(']');
            }
            other => other.write_compact(out),
        }
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

// String contents carry their source escape bodies verbatim (the tokenizer
// never expands them), so backslashes pass through untouched; only raw
// quotes and control bytes need escaping here.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_number(n: Number, out: &mut String) {
    match n {
        Number::Integer(i) => out.push_str(&i.to_string()),
        Number::Float(f) => {
            if f.is_finite() {
                out.push_str(&f.to_string());
            } else {
                out.push_str("null");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_object_roundtrip() {
        let mut map = IndexMap::new();
        map.insert("id".to_string(), JsonValue::Number(Number::Integer(1)));
        map.insert("name".to_string(), JsonValue::String("A".to_string()));
        let v = JsonValue::Object(map);
        assert_eq!(v.to_compact_string(), r#"{"id":1,"name":"A"}"#);
    }

    #[test]
    fn escaped_body_passes_through() {
        // Decoded strings keep the source escapes; the writer must not
        // double-escape the backslash.
        let v = JsonValue::String("a\\nb".to_string());
        assert_eq!(v.to_compact_string(), r#""a\nb""#);
    }

    #[test]
    fn raw_control_bytes_are_escaped() {
        let v = JsonValue::String("a\nb".to_string());
        assert_eq!(v.to_compact_string(), "\"a\\nb\"");
    }

    #[test]
    fn pretty_indents_nested() {
        let mut inner = IndexMap::new();
        inner.insert("c".to_string(), JsonValue::Number(Number::Integer(1)));
        let mut map = IndexMap::new();
        map.insert("b".to_string(), JsonValue::Object(inner));
        let v = JsonValue::Object(map);
        assert_eq!(v.to_pretty_string(), "{\n  \"b\": {\n    \"c\": 1\n  }\n}");
    }

    #[test]
    fn empty_containers_stay_inline() {
        let v = JsonValue::Array(vec![JsonValue::Object(IndexMap::new())]);
        assert_eq!(v.to_pretty_string(), "[\n  {}\n]");
    }

    #[test]
    fn float_formatting() {
        let mut out = String::new();
        write_number(Number::Float(42.5), &mut out);
        assert_eq!(out, "42.5");
    }
}
