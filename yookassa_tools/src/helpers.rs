use ofl_common::Amount;

use crate::YookassaApiError;

/// YooKassa reports amounts as decimal strings, e.g. `"1000.00"`.
pub fn parse_money(value: &str) -> Result<Amount, YookassaApiError> {
    value.parse::<Amount>().map_err(|e| YookassaApiError::InvalidCurrencyAmount(e.to_string()))
}

pub fn format_money(amount: Amount) -> String {
    format!("{amount}")
}
