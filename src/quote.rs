use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Settings;

/// A source of spot prices for crypto symbols.
#[async_trait]
pub trait QuoteSource {
    async fn latest_price(&self, symbol: &str) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: HashMap<String, Vec<QuoteEntry>>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    quote: HashMap<String, Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    price: f64,
}

/// CoinMarketCap quotes client.
pub struct CmcClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl CmcClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            anyhow!("no API key configured; set api_key in the settings file or PRICEMESH_API_KEY")
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_url: settings.api_url().to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl QuoteSource for CmcClient {
    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        let response: QuoteResponse = self
            .http
            .get(&self.api_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("quote request failed")?
            .error_for_status()
            .context("quote request rejected")?
            .json()
            .await
            .context("failed to decode quote response")?;

        extract_usd_price(&response, symbol)
    }
}

fn extract_usd_price(response: &QuoteResponse, symbol: &str) -> Result<f64> {
    response
        .data
        .get(symbol)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.quote.get("USD"))
        .map(|quote| quote.price)
        .ok_or_else(|| anyhow!("could not find price for symbol {symbol}"))
}
