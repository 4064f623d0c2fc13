use crate::marketplace::{CatalogGateway, MarketplaceError};
use crate::models::{DestinationItem, NewDestinationItem, SourceItem};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    #[error("no category detected for \"{0}\"")]
    NoCategory(String),
    #[error("no images available for \"{0}\"")]
    NoImages(String),
    #[error(transparent)]
    Marketplace(#[from] MarketplaceError),
}

/// Creates the destination counterpart of `item`: category detection, image upload, then
/// item creation. Each call is one attempt; retrying is the caller's business.
pub async fn migrate_item(
    gateway: &dyn CatalogGateway,
    item: &SourceItem,
) -> Result<DestinationItem, MigrationError> {
    let category_id = gateway
        .detect_category(&item.name)
        .await?
        .ok_or_else(|| MigrationError::NoCategory(item.name.clone()))?;

    let mut picture_ids = Vec::with_capacity(item.images.len());
    for url in &item.images {
        match gateway.upload_image(url).await {
            Ok(id) => picture_ids.push(id),
            Err(err) => {
                warn!(
                    target = "migrator.marketplace",
                    item_id = %item.id,
                    url = %url,
                    error = %err,
                    "image_upload_failed"
                );
            }
        }
    }
    if picture_ids.is_empty() {
        return Err(MigrationError::NoImages(item.name.clone()));
    }

    let payload = NewDestinationItem::from_source(item, category_id, picture_ids);
    Ok(gateway.create_destination_item(&payload).await?)
}
