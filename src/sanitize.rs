// Secret redaction for anything that reaches a log line

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Replacement written in place of a secret value
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values are never logged
const SECRET_FIELDS: &[&str] = &["access_token", "refresh_token", "id_token", "client_secret"];

/// `key=value` pairs as they appear in form bodies and query strings
static FORM_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(access_token|refresh_token|id_token|client_secret)=[^&\s"',;<]+"#)
        .expect("valid form secret regex")
});

/// `"key": "value"` pairs inside JSON that failed to parse as a whole
static JSON_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(access_token|refresh_token|id_token|client_secret)"\s*:\s*"[^"]*""#)
        .expect("valid json secret regex")
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*").expect("valid bearer regex")
});

fn is_secret_field(key: &str) -> bool {
    SECRET_FIELDS
        .iter()
        .any(|field| field.eq_ignore_ascii_case(key))
}

/// Return a copy of a structured payload with secret fields redacted at any depth
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    if is_secret_field(key) && !v.is_null() {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), sanitize_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::String(s) => Value::String(sanitize_text(s)),
        other => other.clone(),
    }
}

/// Redact secrets inside free text
pub fn sanitize_text(text: &str) -> String {
    let text = FORM_SECRET.replace_all(text, format!("${{1}}={}", REDACTED).as_str());
    let text = JSON_SECRET.replace_all(&text, format!("\"${{1}}\":\"{}\"", REDACTED).as_str());
    BEARER
        .replace_all(&text, format!("Bearer {}", REDACTED).as_str())
        .into_owned()
}

/// Redact a raw response body, preferring structured redaction when it is JSON
pub fn sanitize_body(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => sanitize_value(&value).to_string(),
        Err(_) => sanitize_text(&String::from_utf8_lossy(body)),
    }
}
