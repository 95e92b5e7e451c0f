//! Canonical JSON encoding matching Swift's `JSONEncoder` defaults: keys
//! sorted lexicographically, no insignificant whitespace, and `/`
//! escaped as `\/` in both keys and string values.
//!
//! Clients sign over this exact byte sequence (SPEC_FULL.md §4.3), so
//! `serde_json`'s default `Serialize` output cannot be used directly — it
//! preserves struct field order rather than sorting, and it doesn't
//! escape `/`. This is a small, dedicated routine rather than a
//! `Serializer` impl because the assertion payload is a flat, known
//! shape built from `serde_json::Value`.

use serde_json::Value;

/// Serializes a JSON value into Swift-`JSONEncoder`-compatible canonical
/// bytes: object keys sorted, no whitespace, `/` escaped everywhere.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_value(value, &mut out);
    out.into_bytes()
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
