// Credential loading from process environment

use serde::Serialize;
use std::collections::BTreeMap;

use super::types::CredentialConfig;
use crate::error::AuthError;

/// Accepted variable names, preferred first
pub const CLIENT_ID_VARS: [&str; 2] = ["SB1_CLIENT_ID", "CLIENT_ID"];
pub const CLIENT_SECRET_VARS: [&str; 2] = ["SB1_CLIENT_SECRET", "CLIENT_SECRET"];
pub const REFRESH_TOKEN_VARS: [&str; 2] = ["SB1_REFRESH_TOKEN", "REFRESH_TOKEN"];

/// Strip surrounding whitespace and quote characters left over from
/// copy-pasting secrets into dashboards and .env files
pub fn clean_env(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// First alias with a non-empty cleaned value
fn resolve<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(*name))
        .map(|raw| clean_env(&raw))
        .find(|value| !value.is_empty())
}

/// Load credentials through an arbitrary variable lookup
pub fn load_with<F>(lookup: F) -> Result<CredentialConfig, AuthError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = resolve(&lookup, &CLIENT_ID_VARS);
    let client_secret = resolve(&lookup, &CLIENT_SECRET_VARS);
    let seed_refresh_token = resolve(&lookup, &REFRESH_TOKEN_VARS);

    tracing::info!(
        has_client_id = client_id.is_some(),
        has_client_secret = client_secret.is_some(),
        has_refresh_token = seed_refresh_token.is_some(),
        refresh_token_len = seed_refresh_token.as_ref().map(|t| t.len()).unwrap_or(0),
        "Loaded credential configuration"
    );

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Ok(CredentialConfig {
            client_id,
            client_secret,
            seed_refresh_token,
        }),
        _ => Err(AuthError::Config(
            "SB1_CLIENT_ID or SB1_CLIENT_SECRET is not set".to_string(),
        )),
    }
}

/// Load credentials from the process environment
pub fn load_from_env() -> Result<CredentialConfig, AuthError> {
    load_with(|name| std::env::var(name).ok())
}

/// Presence and length of one variable, never its value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarPresence {
    pub present: bool,
    pub len: usize,
}

impl VarPresence {
    fn of(value: &str) -> Self {
        Self {
            present: !value.is_empty(),
            len: value.len(),
        }
    }
}

/// Diagnostic report for one secret and its aliases
#[derive(Debug, Clone, Serialize)]
pub struct AliasReport {
    pub pick: String,
    pub raw: BTreeMap<String, VarPresence>,
    pub cleaned: BTreeMap<String, VarPresence>,
}

/// Describe which alias would be used for a secret and what each looks like
pub fn describe_aliases<F>(lookup: F, names: &[&str]) -> AliasReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut raw = BTreeMap::new();
    let mut cleaned = BTreeMap::new();
    let mut pick = None;

    for &name in names {
        let value = lookup(name).unwrap_or_default();
        let clean = clean_env(&value);
        if pick.is_none() && !clean.is_empty() {
            pick = Some(name.to_string());
        }
        raw.insert(name.to_string(), VarPresence::of(&value));
        cleaned.insert(name.to_string(), VarPresence::of(&clean));
    }

    AliasReport {
        pick: pick.unwrap_or_else(|| "NONE".to_string()),
        raw,
        cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_clean_env() {
        assert_eq!(clean_env("  abc  "), "abc");
        assert_eq!(clean_env("\"abc\""), "abc");
        assert_eq!(clean_env("'abc'"), "abc");
        assert_eq!(clean_env(" \"'abc'\" \n"), "abc");
        assert_eq!(clean_env("a\"b"), "a\"b");
        assert_eq!(clean_env("\"\""), "");
    }

    #[test]
    fn test_load_prefers_primary_alias() {
        let creds = load_with(env(&[
            ("SB1_CLIENT_ID", "primary-id"),
            ("CLIENT_ID", "fallback-id"),
            ("CLIENT_SECRET", "'secret'"),
            ("SB1_REFRESH_TOKEN", " seed123 "),
        ]))
        .unwrap();

        assert_eq!(creds.client_id, "primary-id");
        assert_eq!(creds.client_secret, "secret");
        assert_eq!(creds.seed_refresh_token.as_deref(), Some("seed123"));
    }

    #[test]
    fn test_blank_primary_alias_falls_through() {
        let creds = load_with(env(&[
            ("SB1_CLIENT_ID", "\"\""),
            ("CLIENT_ID", "fallback-id"),
            ("SB1_CLIENT_SECRET", "secret"),
        ]))
        .unwrap();
        assert_eq!(creds.client_id, "fallback-id");
    }

    #[test]
    fn test_missing_refresh_token_is_tolerated() {
        let creds = load_with(env(&[
            ("SB1_CLIENT_ID", "id"),
            ("SB1_CLIENT_SECRET", "secret"),
        ]))
        .unwrap();
        assert_eq!(creds.seed_refresh_token, None);
    }

    #[test]
    fn test_missing_client_credentials_is_config_error() {
        let err = load_with(env(&[("SB1_CLIENT_ID", "id")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));

        let err = load_with(env(&[("SB1_CLIENT_SECRET", "secret")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_describe_aliases() {
        let report = describe_aliases(
            env(&[("SB1_REFRESH_TOKEN", "  "), ("REFRESH_TOKEN", "\"tok\"")]),
            &REFRESH_TOKEN_VARS,
        );

        assert_eq!(report.pick, "REFRESH_TOKEN");
        assert_eq!(
            report.raw["SB1_REFRESH_TOKEN"],
            VarPresence { present: true, len: 2 }
        );
        assert_eq!(
            report.cleaned["SB1_REFRESH_TOKEN"],
            VarPresence { present: false, len: 0 }
        );
        assert_eq!(
            report.cleaned["REFRESH_TOKEN"],
            VarPresence { present: true, len: 3 }
        );
    }

    #[test]
    fn test_describe_aliases_none() {
        let report = describe_aliases(env(&[]), &CLIENT_ID_VARS);
        assert_eq!(report.pick, "NONE");
        assert!(!report.raw["SB1_CLIENT_ID"].present);
    }
}
