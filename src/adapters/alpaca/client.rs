//! Alpaca API Client
//!
//! HTTP client for the Alpaca trading and market data REST APIs.
//! Implements both the bar source and the brokerage port.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::types::{
    timeframe_str, AccountResponse, ApiErrorBody, BarsPage, BracketOrderRequest, ClockResponse,
    OrderResponse, PositionResponse,
};
use crate::config::BrokerSection;
use crate::domain::{Bar, BracketOrderSpec};
use crate::ports::{
    BarInterval, BarSource, BrokerError, BrokeragePort, Lookback, MarketDataError, OrderHandle,
};

/// Maximum bars per data API page
const PAGE_LIMIT: usize = 10_000;

/// Alpaca client configuration
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub trading_url: String,
    pub data_url: String,
    pub feed: String,
    pub key_id: String,
    pub secret_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Number of retry attempts
    pub max_retries: u32,
}

impl AlpacaConfig {
    pub fn from_section(section: &BrokerSection, key_id: String, secret_key: String) -> Self {
        Self {
            trading_url: section.trading_url.trim_end_matches('/').to_string(),
            data_url: section.data_url.trim_end_matches('/').to_string(),
            feed: section.feed.clone(),
            key_id,
            secret_key,
            timeout: Duration::from_secs(section.timeout_secs),
            max_retries: section.max_retries.max(1),
        }
    }
}

/// Failure of a single HTTP exchange, before mapping onto a port error
#[derive(Debug)]
enum RequestError {
    Transport(String),
    RateLimited(String),
    Unauthorized(String),
    Rejected(String),
    Status(StatusCode, String),
    Parse(String),
}

impl From<RequestError> for BrokerError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Transport(msg) => BrokerError::ApiError(msg),
            RequestError::RateLimited(msg) => BrokerError::RateLimited(msg),
            RequestError::Unauthorized(msg) => BrokerError::Unauthorized(msg),
            RequestError::Rejected(msg) => BrokerError::Rejected(msg),
            RequestError::Status(status, msg) => {
                BrokerError::ApiError(format!("API error {}: {}", status, msg))
            }
            RequestError::Parse(msg) => BrokerError::ParseError(msg),
        }
    }
}

impl From<RequestError> for MarketDataError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Transport(msg) => MarketDataError::RestError(msg),
            RequestError::RateLimited(msg) => MarketDataError::RateLimited(msg),
            RequestError::Unauthorized(msg) => MarketDataError::Unauthorized(msg),
            RequestError::Rejected(msg) => MarketDataError::UnknownSymbol(msg),
            RequestError::Status(status, msg) => {
                MarketDataError::RestError(format!("API error {}: {}", status, msg))
            }
            RequestError::Parse(msg) => MarketDataError::ParseError(msg),
        }
    }
}

/// Alpaca brokerage + market data client
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    config: AlpacaConfig,
    http: Client,
}

impl AlpacaClient {
    pub fn new(config: AlpacaConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn trading_url(&self) -> &str {
        &self.config.trading_url
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.config.key_id)
            .header("APCA-API-SECRET-KEY", &self.config.secret_key)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, RequestError> {
        let req = self.authed(req);
        let response = self
            .execute_with_retry(|| async {
                req.try_clone()
                    .ok_or_else(|| RequestError::Transport("Failed to clone request".into()))?
                    .send()
                    .await
                    .map_err(|e| RequestError::Transport(e.to_string()))
            })
            .await?;

        self.handle_response(response).await
    }

    /// Execute request with retry logic and rate limit handling
    async fn execute_with_retry<F, Fut>(&self, request_fn: F) -> Result<reqwest::Response, RequestError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, RequestError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match request_fn().await {
                Ok(response) => {
                    // Handle rate limiting (429) with exponential backoff
                    if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        let backoff = Duration::from_secs(2u64.pow(attempt + 1)); // 2s, 4s, 8s
                        tracing::warn!(
                            "Rate limited (429), backing off for {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.config.max_retries
                        );
                        last_error = Some(RequestError::RateLimited(
                            "Rate limit exceeded - backing off".into(),
                        ));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    // Retry on server errors (5xx)
                    if response.status().is_server_error() {
                        last_error = Some(RequestError::Status(
                            response.status(),
                            "server error".into(),
                        ));
                        tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RequestError::Transport("Max retries exceeded".into())))
    }

    /// Handle API response and deserialize
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, RequestError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&error_text)
                .map(|body| body.message)
                .unwrap_or(error_text);

            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => RequestError::RateLimited(message),
                StatusCode::UNAUTHORIZED => RequestError::Unauthorized(message),
                StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND => {
                    RequestError::Rejected(message)
                }
                _ => RequestError::Status(status, message),
            });
        }

        response
            .json()
            .await
            .map_err(|e| RequestError::Parse(format!("Failed to parse response: {}", e)))
    }

    async fn fetch_bars(
        &self,
        ticker: &str,
        interval: BarInterval,
        lookback: Lookback,
    ) -> Result<Vec<Bar>, RequestError> {
        let url = format!("{}/v2/stocks/{}/bars", self.config.data_url, ticker);
        let now = Utc::now();

        // Most-recent-N is served newest first and reversed; windows page forward
        let (start, limit, descending) = match lookback {
            Lookback::Bars(n) => {
                let span = interval.duration() * (n as i32).saturating_mul(4) + chrono::Duration::days(4);
                (now - span, n.min(PAGE_LIMIT), true)
            }
            Lookback::Window(window) => (now - window, PAGE_LIMIT, false),
        };

        let mut bars: Vec<Bar> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.http.get(&url).query(&[
                ("timeframe", timeframe_str(interval).to_string()),
                ("start", start.to_rfc3339()),
                ("limit", limit.to_string()),
                ("feed", self.config.feed.clone()),
                ("adjustment", "raw".to_string()),
                ("sort", if descending { "desc" } else { "asc" }.to_string()),
            ]);
            if let Some(ref token) = page_token {
                req = req.query(&[("page_token", token)]);
            }

            let page: BarsPage = self.get_json(req).await?;
            bars.extend(page.bars.unwrap_or_default().into_iter().map(Bar::from));

            match page.next_page_token {
                Some(token) if !descending && !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        if descending {
            bars.reverse();
        }
        Ok(bars)
    }
}

#[async_trait]
impl BarSource for AlpacaClient {
    async fn get_bars(
        &self,
        ticker: &str,
        interval: BarInterval,
        lookback: Lookback,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let bars = self.fetch_bars(ticker, interval, lookback).await?;
        tracing::debug!("Fetched {} {:?} bars for {}", bars.len(), interval, ticker);
        Ok(bars)
    }
}

#[async_trait]
impl BrokeragePort for AlpacaClient {
    async fn get_buying_power(&self) -> Result<f64, BrokerError> {
        let url = format!("{}/v2/account", self.config.trading_url);
        let account: AccountResponse = self.get_json(self.http.get(&url)).await?;
        if account.trading_blocked {
            return Err(BrokerError::Rejected("account trading is blocked".to_string()));
        }
        account
            .buying_power
            .parse::<f64>()
            .map_err(|e| BrokerError::ParseError(format!("buying_power: {}", e)))
    }

    async fn get_positions(&self) -> Result<HashSet<String>, BrokerError> {
        let url = format!("{}/v2/positions", self.config.trading_url);
        let positions: Vec<PositionResponse> = self.get_json(self.http.get(&url)).await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.qty.parse::<f64>().map(|q| q != 0.0).unwrap_or(true))
            .map(|p| p.symbol)
            .collect())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        let url = format!("{}/v2/clock", self.config.trading_url);
        let clock: ClockResponse = self.get_json(self.http.get(&url)).await?;
        if !clock.is_open {
            if let Some(next) = clock.next_open {
                tracing::debug!("Market closed, next open {}", next);
            }
        }
        Ok(clock.is_open)
    }

    /// Alpaca brackets accept only limit and stop exits
    fn supports_trailing_stop(&self) -> bool {
        false
    }

    async fn submit_bracket(&self, spec: &BracketOrderSpec) -> Result<OrderHandle, BrokerError> {
        spec.validate()?;
        // One request carries all three legs; the children activate only after the entry fills.
        // client_order_id is unique per bracket, so a resent request is refused as a duplicate.
        let body = BracketOrderRequest::try_from(spec)?;
        let url = format!("{}/v2/orders", self.config.trading_url);

        let order: OrderResponse = self.get_json(self.http.post(&url).json(&body)).await?;
        Ok(OrderHandle {
            parent_id: if order.client_order_id.is_empty() {
                spec.parent_id().to_string()
            } else {
                order.client_order_id
            },
            broker_order_id: order.id,
            status: order.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AlpacaConfig {
        AlpacaConfig::from_section(
            &BrokerSection {
                trading_url: "https://paper-api.alpaca.markets/".to_string(),
                max_retries: 0,
                ..Default::default()
            },
            "key".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn test_config_from_section() {
        let config = test_config();
        assert_eq!(config.trading_url, "https://paper-api.alpaca.markets");
        assert_eq!(config.data_url, "https://data.alpaca.markets");
        assert_eq!(config.feed, "iex");
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_client_creation() {
        let client = AlpacaClient::new(test_config());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().trading_url(), "https://paper-api.alpaca.markets");
    }

    #[test]
    fn test_no_trailing_stop_brackets() {
        let client = AlpacaClient::new(test_config()).unwrap();
        assert!(!client.supports_trailing_stop());
    }

    #[test]
    fn test_request_error_mapping() {
        assert!(matches!(
            BrokerError::from(RequestError::RateLimited("x".into())),
            BrokerError::RateLimited(_)
        ));
        assert!(matches!(
            MarketDataError::from(RequestError::Parse("x".into())),
            MarketDataError::ParseError(_)
        ));
    }
}
