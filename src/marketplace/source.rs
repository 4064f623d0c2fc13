use crate::http::build_client;
use crate::marketplace::config::{
    MAX_PAGES, PAGE_SIZE, SOURCE_API_KEY, SOURCE_API_SECRET, SOURCE_API_URL,
};
use crate::marketplace::{MarketplaceError, ensure_success};
use crate::models::{Dimensions, SourceItem};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SourceClient {
    http: Client,
    base_url: String,
    authorization: Option<String>,
    page_size: usize,
    max_pages: usize,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    weight: Value,
    #[serde(default)]
    dimensions: Option<RawDimensions>,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawDimensions {
    #[serde(default)]
    length: Value,
    #[serde(default)]
    width: Value,
    #[serde(default)]
    height: Value,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    src: Option<String>,
}

impl SourceClient {
    pub fn from_env() -> Self {
        Self::new(
            SOURCE_API_URL.as_str(),
            SOURCE_API_KEY.as_str(),
            SOURCE_API_SECRET.as_str(),
            *PAGE_SIZE,
        )
    }

    pub fn new(base_url: &str, key: &str, secret: &str, page_size: usize) -> Self {
        let authorization = if key.is_empty() || secret.is_empty() {
            None
        } else {
            Some(basic_auth_header(key, secret))
        };
        Self {
            http: build_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub async fn list_all(&self) -> Result<Vec<SourceItem>, MarketplaceError> {
        let mut items = Vec::new();
        for page in 1..=self.max_pages {
            let batch = self.fetch_page(page).await?;
            let fetched = batch.len();
            items.extend(batch.into_iter().map(SourceItem::from));
            debug!(target = "migrator.marketplace", page, fetched, "source_page_fetched");
            if fetched < self.page_size {
                return Ok(items);
            }
        }
        warn!(
            target = "migrator.marketplace",
            pages = self.max_pages,
            "source_pagination_limit_reached"
        );
        Err(MarketplaceError::PageLimit {
            catalog: "source",
            pages: self.max_pages,
        })
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<RawProduct>, MarketplaceError> {
        let url = format!("{}/products", self.base_url);
        let mut request = self.http.get(url).query(&[
            ("page", page.to_string()),
            ("per_page", self.page_size.to_string()),
        ]);
        if let Some(auth) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request
            .send()
            .await
            .map_err(|err| MarketplaceError::Request(err.to_string()))?;
        ensure_success(response)
            .await?
            .json::<Vec<RawProduct>>()
            .await
            .map_err(|err| MarketplaceError::Decode(err.to_string()))
    }
}

fn basic_auth_header(key: &str, secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{key}:{secret}")))
}

impl From<RawProduct> for SourceItem {
    fn from(raw: RawProduct) -> Self {
        let dimensions = raw.dimensions.and_then(|dims| {
            let parsed = Dimensions {
                width: number_from(&dims.width),
                height: number_from(&dims.height),
                length: number_from(&dims.length),
            };
            (parsed.width.is_some() || parsed.height.is_some() || parsed.length.is_some())
                .then_some(parsed)
        });
        SourceItem {
            id: id_from(&raw.id),
            name: raw.name.unwrap_or_default(),
            price: number_from(&raw.price).unwrap_or(0.0),
            description: raw.description.unwrap_or_default(),
            weight: number_from(&raw.weight),
            dimensions,
            images: raw
                .images
                .into_iter()
                .filter_map(|image| image.src)
                .map(|src| src.trim().to_string())
                .filter(|src| !src.is_empty())
                .collect(),
        }
    }
}

fn id_from(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

// Prices and measurements arrive as strings ("12.50") or numbers depending on the store.
fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
