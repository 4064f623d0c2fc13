use crate::marketplace::{CatalogGateway, GatewayFuture, MarketplaceError};
use crate::models::{DestinationItem, NewDestinationItem, SourceItem};
use std::{future::Future, sync::Mutex};
use tokio::time::{Duration, sleep};
use uuid::Uuid;

const DEMO_CATALOG: [(&str, f64); 25] = [
    ("Linen Throw Pillow", 24.0),
    ("Walnut Serving Board", 48.5),
    ("Stoneware Dinner Plate", 18.0),
    ("Brass Desk Lamp", 89.0),
    ("Wool Table Runner", 35.0),
    ("Glass Carafe", 22.0),
    ("Copper Measuring Cups", 29.0),
    ("Rattan Storage Basket", 41.0),
    ("Cotton Tea Towel Set", 16.0),
    ("Ceramic Planter", 27.5),
    ("Oak Wall Shelf", 64.0),
    ("Marble Coaster Set", 31.0),
    ("Enamel Camping Mug", 14.0),
    ("Jute Doormat", 38.0),
    ("Beeswax Candle Trio", 26.0),
    ("Cast Iron Skillet", 55.0),
    ("Bamboo Bath Mat", 33.0),
    ("Leather Key Tray", 19.5),
    ("Terracotta Vase", 44.0),
    ("Velvet Cushion Cover", 21.0),
    ("Acacia Salad Bowl", 39.0),
    ("Porcelain Espresso Cups", 28.0),
    ("Woven Wall Hanging", 52.0),
    ("Mystery Box Small", 10.0),
    ("Mystery Box Large", 20.0),
];

/// Offline stand-in for both marketplaces. The first five catalog entries already exist at
/// the destination (with different casing) and the mystery boxes never get a category.
pub struct DemoMarketplace {
    source: Vec<SourceItem>,
    destination: Mutex<Vec<DestinationItem>>,
}

impl DemoMarketplace {
    pub fn seeded() -> Self {
        let source = DEMO_CATALOG
            .iter()
            .enumerate()
            .map(|(idx, (name, price))| SourceItem {
                id: format!("src-{:03}", idx + 1),
                name: (*name).to_string(),
                price: *price,
                description: format!("{name} from the demo source catalog."),
                weight: Some(0.5 + idx as f64 * 0.1),
                dimensions: None,
                images: vec![
                    format!("https://images.example.com/demo/{}/front.jpg", idx + 1),
                    format!("https://images.example.com/demo/{}/side.jpg", idx + 1),
                ],
            })
            .collect::<Vec<_>>();
        let destination = source
            .iter()
            .take(5)
            .enumerate()
            .map(|(idx, item)| DestinationItem {
                id: format!("dst-{:03}", idx + 1),
                title: item.name.to_uppercase(),
                price: item.price,
                description: item.description.clone(),
            })
            .collect();
        Self {
            source,
            destination: Mutex::new(destination),
        }
    }

    fn destination_snapshot(&self) -> Result<Vec<DestinationItem>, MarketplaceError> {
        self.destination
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| MarketplaceError::Request("demo catalog poisoned".into()))
    }
}

impl CatalogGateway for DemoMarketplace {
    fn list_source_items(&self) -> GatewayFuture<'_, Vec<SourceItem>> {
        Box::pin(async move {
            short_pause(15).await;
            Ok(self.source.clone())
        })
    }

    fn list_destination_items(&self) -> GatewayFuture<'_, Vec<DestinationItem>> {
        Box::pin(async move {
            short_pause(15).await;
            self.destination_snapshot()
        })
    }

    fn detect_category<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<String>> {
        Box::pin(async move {
            short_pause(20).await;
            let lowered = name.to_lowercase();
            if lowered.contains("mystery") {
                return Ok(None);
            }
            let category = if lowered.contains("lamp") || lowered.contains("candle") {
                "MLB-LIGHTING"
            } else if lowered.contains("cup") || lowered.contains("bowl") || lowered.contains("plate")
            {
                "MLB-KITCHEN"
            } else {
                "MLB-HOME-DECOR"
            };
            Ok(Some(category.to_string()))
        })
    }

    fn upload_image<'a>(&'a self, url: &'a str) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            short_pause(25).await;
            if !url.starts_with("https://") {
                return Err(MarketplaceError::Status {
                    status: 400,
                    body: format!("unsupported picture source: {url}"),
                });
            }
            Ok(format!("pic-{}", Uuid::new_v4().simple()))
        })
    }

    fn create_destination_item<'a>(
        &'a self,
        payload: &'a NewDestinationItem,
    ) -> GatewayFuture<'a, DestinationItem> {
        Box::pin(async move {
            short_pause(40).await;
            if payload.title.is_empty() {
                return Err(MarketplaceError::Status {
                    status: 400,
                    body: "title is required".into(),
                });
            }
            let created = DestinationItem {
                id: format!("dst-{}", Uuid::new_v4().simple()),
                title: payload.title.clone(),
                price: payload.price,
                description: payload.description.clone(),
            };
            self.destination
                .lock()
                .map_err(|_| MarketplaceError::Request("demo catalog poisoned".into()))?
                .push(created.clone());
            Ok(created)
        })
    }
}

fn short_pause(ms: u64) -> impl Future<Output = ()> {
    sleep(Duration::from_millis(ms))
}
