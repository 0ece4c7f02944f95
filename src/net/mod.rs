mod client;
mod fetch;
mod types;

pub use client::HttpFetcher;
pub(crate) use client::loggable;
pub use fetch::Fetch;
pub use types::{FetchError, FetchResponse, MediaStream, RequestSpec};
