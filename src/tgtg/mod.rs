/// Marketplace API integration
///
/// HTTP client, payload models, error taxonomy, credential handling and
/// message rendering for the food-surplus marketplace.

pub mod client;
pub mod credentials;
pub mod error;
pub mod formatter;
pub mod models;
pub mod registration;

pub use client::{LoginApi, TgtgClient, UpstreamApi};
pub use credentials::Credentials;
pub use error::{UpstreamError, UpstreamResult};
pub use models::FavoriteItem;
