use once_cell::sync::Lazy;
use std::env;

pub static SOURCE_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("SOURCE_API_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "http://localhost:8081/wp-json/wc/v3".to_string())
});

pub static SOURCE_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("SOURCE_API_KEY").unwrap_or_default());

pub static SOURCE_API_SECRET: Lazy<String> =
    Lazy::new(|| env::var("SOURCE_API_SECRET").unwrap_or_default());

pub static DESTINATION_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("DESTINATION_API_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "http://localhost:8082/v1".to_string())
});

pub static DESTINATION_ACCESS_TOKEN: Lazy<String> =
    Lazy::new(|| env::var("DESTINATION_ACCESS_TOKEN").unwrap_or_default());

pub static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    env::var("MARKETPLACE_PAGE_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| (1..=100).contains(v))
        .unwrap_or(50)
});

/// Hard stop for pagination loops against misbehaving APIs.
pub const MAX_PAGES: usize = 400;
