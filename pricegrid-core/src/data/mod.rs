//! Remote data providers.

pub mod provider;
pub mod stooq;

pub use provider::{DataError, DataProvider, DataSource, FetchResult, RawBar};
pub use stooq::StooqProvider;
