//! Search API client and credentials.
//!
//! This module provides the [`SearchClient`] for the listing search endpoint,
//! along with the static header credentials ([`ApiCredentials`]) it sends.

mod auth;
mod search;

pub use auth::ApiCredentials;
pub use search::SearchClient;
