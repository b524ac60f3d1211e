//! Nord Pool data-portal client
//!
//! Implements [`MarketApi`](super::MarketApi) against the public
//! DayAheadPriceIndices endpoint. One GET per calendar day, scoped by
//! date, index name (area), currency and resolution; HTTP 204 is the
//! "no prices published yet" tri-state, not an error.

use super::{DayData, DayEntry, DayPrices, DayQuery, MarketApi};
use crate::error::{ElspotError, Result};
use crate::logging::get_logger;

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Reqwest-backed Nord Pool client
pub struct NordPoolClient {
    base_url: String,
    client: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

impl NordPoolClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            logger: get_logger("nordpool"),
        })
    }

    fn url_for(&self, query: &DayQuery<'_>) -> String {
        format!(
            "{}?date={}&market=DayAhead&indexNames={}&currency={}&resolutionInMinutes={}",
            self.base_url,
            query.date.format("%Y-%m-%d"),
            query.area,
            query.currency,
            query.resolution.minutes(),
        )
    }
}

impl MarketApi for NordPoolClient {
    async fn fetch_day(&self, query: &DayQuery<'_>) -> Result<DayPrices> {
        let url = self.url_for(query);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        self.logger.debug(&format!(
            "GET {} status={}",
            query.date.format("%Y-%m-%d"),
            status
        ));

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(DayPrices::Empty);
        }
        if !status.is_success() {
            return Err(ElspotError::network(format!("HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ElspotError::generic(format!("JSON parse failed: {}", e)))?;

        // The portal answers 200 with a title body on bad credentials
        if body.get("title").and_then(|t| t.as_str()) == Some("Unauthorized") {
            return Err(ElspotError::api("Nord Pool API unauthorized"));
        }

        let currency = body
            .get("currency")
            .and_then(|c| c.as_str())
            .map(str::to_string);

        let mut entries = Vec::new();
        if let Some(items) = body.get("multiIndexEntries").and_then(|v| v.as_array()) {
            for item in items {
                let Some(delivery_start) =
                    item.get("deliveryStart").and_then(|v| v.as_str())
                else {
                    continue;
                };
                let Some(price_per_mwh) = item
                    .get("entryPerArea")
                    .and_then(|e| e.get(query.area))
                    .and_then(|p| p.as_f64())
                else {
                    continue;
                };
                entries.push(DayEntry {
                    delivery_start_utc: delivery_start.to_string(),
                    raw_price_per_mwh: price_per_mwh,
                });
            }
        }

        Ok(DayPrices::Data(DayData { currency, entries }))
    }
}
