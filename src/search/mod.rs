pub mod service;

pub use service::{SearchResult, SearchService};
