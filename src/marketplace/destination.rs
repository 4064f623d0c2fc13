use crate::http::build_client;
use crate::marketplace::config::{
    DESTINATION_ACCESS_TOKEN, DESTINATION_API_URL, MAX_PAGES, PAGE_SIZE,
};
use crate::marketplace::{MarketplaceError, ensure_success};
use crate::models::{DestinationItem, NewDestinationItem};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use urlencoding::encode;

#[derive(Debug, Clone)]
pub struct DestinationClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    page_size: usize,
    max_pages: usize,
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    results: Vec<RawItem>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryPrediction {
    #[serde(default)]
    category_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PictureUpload<'a> {
    source: &'a str,
}

#[derive(Debug, Deserialize)]
struct PictureReceipt {
    id: String,
}

impl DestinationClient {
    pub fn from_env() -> Self {
        Self::new(
            DESTINATION_API_URL.as_str(),
            DESTINATION_ACCESS_TOKEN.as_str(),
            *PAGE_SIZE,
        )
    }

    pub fn new(base_url: &str, access_token: &str, page_size: usize) -> Self {
        Self {
            http: build_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: Some(access_token.to_string()).filter(|t| !t.is_empty()),
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub async fn list_all(&self) -> Result<Vec<DestinationItem>, MarketplaceError> {
        let mut items = Vec::new();
        for page in 0..self.max_pages {
            let offset = page * self.page_size;
            let request = self.http.get(format!("{}/items", self.base_url)).query(&[
                ("offset", offset.to_string()),
                ("limit", self.page_size.to_string()),
            ]);
            let payload: ItemsPage = self.send_json(request).await?;
            let fetched = payload.results.len();
            let total = payload.paging.and_then(|p| p.total);
            items.extend(payload.results.into_iter().map(DestinationItem::from));
            debug!(target = "migrator.marketplace", offset, fetched, "destination_page_fetched");
            let exhausted = match total {
                Some(total) => items.len() >= total,
                None => fetched < self.page_size,
            };
            if exhausted || fetched == 0 {
                return Ok(items);
            }
        }
        warn!(
            target = "migrator.marketplace",
            pages = self.max_pages,
            "destination_pagination_limit_reached"
        );
        Err(MarketplaceError::PageLimit {
            catalog: "destination",
            pages: self.max_pages,
        })
    }

    pub async fn detect_category(&self, name: &str) -> Result<Option<String>, MarketplaceError> {
        let url = format!(
            "{}/categories/predict?q={}&limit=1",
            self.base_url,
            encode(name.trim())
        );
        let predictions: Vec<CategoryPrediction> = self.send_json(self.http.get(url)).await?;
        Ok(predictions
            .into_iter()
            .find_map(|p| p.category_id)
            .filter(|id| !id.trim().is_empty()))
    }

    pub async fn upload_image(&self, url: &str) -> Result<String, MarketplaceError> {
        let request = self
            .http
            .post(format!("{}/pictures", self.base_url))
            .json(&PictureUpload { source: url });
        let receipt: PictureReceipt = self.send_json(request).await?;
        Ok(receipt.id)
    }

    pub async fn create_item(
        &self,
        payload: &NewDestinationItem,
    ) -> Result<DestinationItem, MarketplaceError> {
        let request = self
            .http
            .post(format!("{}/items", self.base_url))
            .json(payload);
        let created: RawItem = self.send_json(request).await?;
        Ok(DestinationItem::from(created))
    }

    async fn send_json<T>(&self, request: RequestBuilder) -> Result<T, MarketplaceError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| MarketplaceError::Request(err.to_string()))?;
        ensure_success(response)
            .await?
            .json::<T>()
            .await
            .map_err(|err| MarketplaceError::Decode(err.to_string()))
    }
}

impl From<RawItem> for DestinationItem {
    fn from(raw: RawItem) -> Self {
        let id = match raw.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        DestinationItem {
            id,
            title: raw.title.unwrap_or_default(),
            price: raw.price.unwrap_or(0.0),
            description: raw.description.unwrap_or_default(),
        }
    }
}
