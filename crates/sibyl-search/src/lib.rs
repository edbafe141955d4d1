//! Web-search collaborator: provider trait, HTTP client, normalization.

pub mod provider;

pub use provider::{HttpSearchProvider, MockSearchProvider, SearchProvider};
