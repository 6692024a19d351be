use order_ledger_engine::traits::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum YookassaApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Invalid currency amount: {0}")]
    InvalidCurrencyAmount(String),
    #[error("Record is missing mandatory field '{0}'")]
    MissingField(String),
}

impl From<YookassaApiError> for ProviderError {
    fn from(e: YookassaApiError) -> Self {
        match e {
            YookassaApiError::Initialization(s) => ProviderError::Initialization(s),
            YookassaApiError::RestRequestError(s) | YookassaApiError::RestResponseError(s) => {
                ProviderError::Network(s)
            },
            YookassaApiError::JsonError(s) => ProviderError::Json(s),
            YookassaApiError::QueryError { status, message } => ProviderError::Api { status, message },
            YookassaApiError::InvalidCurrencyAmount(s) => ProviderError::MalformedRecord(s),
            YookassaApiError::MissingField(s) => ProviderError::MissingField(s),
        }
    }
}
