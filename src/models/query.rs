use url::form_urlencoded;

use crate::error::ApiError;
use crate::http_client::Query;

/// Query parameters accepted by the transaction endpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionParams {
    /// From repeated `accountKey` parameters or one comma-separated value
    pub account_keys: Vec<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub row_limit: Option<String>,
    pub source: Option<String>,
    pub enrich_with_payment_details: Option<String>,
    pub enrich_with_merchant_logo: Option<String>,
}

/// Export request after validation
#[derive(Debug, Clone, PartialEq)]
pub struct ExportParams {
    pub account_key: String,
    pub from_date: String,
    pub to_date: String,
}

impl ExportParams {
    pub fn to_query(&self) -> Query {
        Query::new()
            .push("accountKey", &self.account_key)
            .push("fromDate", &self.from_date)
            .push("toDate", &self.to_date)
    }

    /// `transactions_<key>_<from>_<to>.csv`, restricted to filename-safe characters
    pub fn filename(&self) -> String {
        let safe = |s: &str| -> String {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                .collect()
        };
        format!(
            "transactions_{}_{}_{}.csv",
            safe(&self.account_key),
            safe(&self.from_date),
            safe(&self.to_date)
        )
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

impl TransactionParams {
    /// Parse a raw query string
    pub fn parse(raw: Option<&str>) -> Self {
        let mut params = Self::default();

        for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "accountKey" => params.account_keys.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string),
                ),
                "fromDate" => params.from_date = non_empty(value),
                "toDate" => params.to_date = non_empty(value),
                "rowLimit" => params.row_limit = non_empty(value),
                "source" => params.source = non_empty(value),
                "enrichWithPaymentDetails" => params.enrich_with_payment_details = non_empty(value),
                "enrichWithMerchantLogo" => params.enrich_with_merchant_logo = non_empty(value),
                _ => {}
            }
        }

        params
    }

    /// Upstream query for `/transactions`
    pub fn to_query(&self) -> Query {
        Query::new()
            .push_all("accountKey", &self.account_keys)
            .push_opt("fromDate", self.from_date.as_ref())
            .push_opt("toDate", self.to_date.as_ref())
            .push_opt("rowLimit", self.row_limit.as_ref())
            .push_opt("source", self.source.as_ref())
            .push_opt(
                "enrichWithPaymentDetails",
                self.enrich_with_payment_details.as_ref(),
            )
    }

    /// Upstream query for `/transactions/classified`
    pub fn to_classified_query(&self) -> Query {
        self.to_query().push_opt(
            "enrichWithMerchantLogo",
            self.enrich_with_merchant_logo.as_ref(),
        )
    }

    /// Export needs one account and a date range
    pub fn require_export(&self) -> Result<ExportParams, ApiError> {
        match (
            self.account_keys.first(),
            self.from_date.as_ref(),
            self.to_date.as_ref(),
        ) {
            (Some(account_key), Some(from_date), Some(to_date)) => Ok(ExportParams {
                account_key: account_key.clone(),
                from_date: from_date.clone(),
                to_date: to_date.clone(),
            }),
            _ => Err(ApiError::ValidationError(
                "accountKey, fromDate and toDate are required".to_string(),
            )),
        }
    }
}
