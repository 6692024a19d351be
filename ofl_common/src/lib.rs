mod amount;

pub mod op;

mod helpers;
mod secret;

pub use amount::{Amount, AmountParseError, CURRENCY_EPSILON, DEFAULT_CURRENCY_CODE};
pub use helpers::parse_boolean_flag;
pub use secret::Secret;
