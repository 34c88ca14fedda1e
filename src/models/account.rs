use serde::Serialize;
use serde_json::Value;

/// A JSON path as a list of object keys
pub type Path = &'static [&'static str];

// Candidate paths, highest priority first

const ACCOUNT_LISTS: &[Path] = &[&["accounts"], &["data", "accounts"], &["items"]];

const ID_PATHS: &[Path] = &[&["key"], &["accountKey"], &["id"], &["accountId"]];

const NAME_PATHS: &[Path] = &[&["name"], &["accountName"], &["alias"], &["description"]];

const TYPE_PATHS: &[Path] = &[
    &["type"],
    &["accountType"],
    &["productType"],
    &["product", "type"],
];

const NUMBER_PATHS: &[Path] = &[
    &["accountNumber", "formatted"],
    &["accountNumber", "value"],
    &["accountNumber"],
    &["bban"],
    &["iban"],
];

const BALANCE_PATHS: &[Path] = &[
    &["balance", "amount"],
    &["balance", "value"],
    &["balance"],
    &["bookedBalance", "amount"],
    &["bookedBalance"],
    &["accountBalance"],
];

const AVAILABLE_PATHS: &[Path] = &[
    &["availableBalance", "amount"],
    &["availableBalance", "value"],
    &["availableBalance"],
    &["available"],
    &["disposableBalance"],
];

const CURRENCY_PATHS: &[Path] = &[
    &["currencyCode"],
    &["currency"],
    &["balance", "currencyCode"],
    &["balance", "currency"],
];

const DEFAULT_CURRENCY: &str = "NOK";

/// Account shape consumed by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    pub account_number_masked: Option<String>,
    pub balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountList {
    pub accounts: Vec<Account>,
}

/// Value at the first candidate path that exists and is not null
pub fn lookup<'a>(value: &'a Value, candidates: &[Path]) -> Option<&'a Value> {
    candidates.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |node, key| node.get(key))
            .filter(|found| !found.is_null())
    })
}

fn lookup_string(value: &Value, candidates: &[Path]) -> Option<String> {
    candidates.iter().find_map(|path| {
        match path.iter().try_fold(value, |node, key| node.get(key))? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

fn lookup_amount(value: &Value, candidates: &[Path]) -> Option<f64> {
    candidates.iter().find_map(|path| {
        match path.iter().try_fold(value, |node, key| node.get(key))? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        }
    })
}

/// Keep only the last four digits of an account number
pub fn mask_account_number(number: &str) -> Option<String> {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        0 => None,
        n if n <= 4 => Some(digits.iter().collect()),
        n => Some(format!("**** {}", digits[n - 4..].iter().collect::<String>())),
    }
}

/// Normalize one upstream account object
pub fn normalize_account(raw: &Value) -> Account {
    let id = lookup_string(raw, ID_PATHS);
    let name = lookup_string(raw, NAME_PATHS)
        .or_else(|| id.clone())
        .unwrap_or_else(|| "Konto".to_string());

    Account {
        name,
        account_type: lookup_string(raw, TYPE_PATHS),
        account_number_masked: lookup_string(raw, NUMBER_PATHS)
            .and_then(|n| mask_account_number(&n)),
        balance: lookup_amount(raw, BALANCE_PATHS),
        available_balance: lookup_amount(raw, AVAILABLE_PATHS),
        currency: lookup_string(raw, CURRENCY_PATHS)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        id,
    }
}

/// Normalize an upstream accounts payload. The list may sit under one of
/// several keys or be the payload itself.
pub fn normalize_accounts(payload: &Value) -> AccountList {
    let list = match payload {
        Value::Array(items) => Some(items),
        other => lookup(other, ACCOUNT_LISTS).and_then(Value::as_array),
    };

    let accounts = list
        .map(|items| items.iter().filter(|v| v.is_object()).map(normalize_account).collect())
        .unwrap_or_default();

    AccountList { accounts }
}
