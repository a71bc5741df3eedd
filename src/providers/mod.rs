pub mod refresh;
pub mod util;
pub mod yahoo_finance;

pub use refresh::{REFRESH_CONCURRENCY, RefreshOutcome, refresh_prices};
