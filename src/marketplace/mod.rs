pub mod config;
pub mod demo;
pub mod destination;
pub mod source;

use crate::models::{DestinationItem, NewDestinationItem, SourceItem};
use reqwest::Response;
use std::{future::Future, pin::Pin, sync::Arc};
use thiserror::Error;

pub use demo::DemoMarketplace;
pub use destination::DestinationClient;
pub use source::SourceClient;

pub type GatewayFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, MarketplaceError>> + Send + 'a>>;

#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("{catalog} catalog still had more items after {pages} pages")]
    PageLimit { catalog: &'static str, pages: usize },
}

/// The two marketplaces as seen by the migration engine.
///
/// Listing calls return complete snapshots; implementations paginate internally.
pub trait CatalogGateway: Send + Sync {
    fn list_source_items(&self) -> GatewayFuture<'_, Vec<SourceItem>>;

    fn list_destination_items(&self) -> GatewayFuture<'_, Vec<DestinationItem>>;

    /// `Ok(None)` when the destination could not suggest a category.
    fn detect_category<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<String>>;

    fn upload_image<'a>(&'a self, url: &'a str) -> GatewayFuture<'a, String>;

    fn create_destination_item<'a>(
        &'a self,
        payload: &'a NewDestinationItem,
    ) -> GatewayFuture<'a, DestinationItem>;
}

#[derive(Clone)]
pub struct RestMarketplace {
    source: SourceClient,
    destination: DestinationClient,
}

impl RestMarketplace {
    pub fn from_env() -> Self {
        Self {
            source: SourceClient::from_env(),
            destination: DestinationClient::from_env(),
        }
    }
}

impl CatalogGateway for RestMarketplace {
    fn list_source_items(&self) -> GatewayFuture<'_, Vec<SourceItem>> {
        Box::pin(self.source.list_all())
    }

    fn list_destination_items(&self) -> GatewayFuture<'_, Vec<DestinationItem>> {
        Box::pin(self.destination.list_all())
    }

    fn detect_category<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<String>> {
        Box::pin(self.destination.detect_category(name))
    }

    fn upload_image<'a>(&'a self, url: &'a str) -> GatewayFuture<'a, String> {
        Box::pin(self.destination.upload_image(url))
    }

    fn create_destination_item<'a>(
        &'a self,
        payload: &'a NewDestinationItem,
    ) -> GatewayFuture<'a, DestinationItem> {
        Box::pin(self.destination.create_item(payload))
    }
}

/// Real REST clients when network access is enabled, the offline demo catalogs otherwise.
pub fn gateway_from_env(network_enabled: bool) -> Arc<dyn CatalogGateway> {
    if network_enabled {
        Arc::new(RestMarketplace::from_env())
    } else {
        Arc::new(DemoMarketplace::seeded())
    }
}

/// Turns a non-2xx response into `MarketplaceError::Status`, keeping the body verbatim.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, MarketplaceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MarketplaceError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}
