//! Client for the upstream card catalog API.
//!
//! The upstream serves paginated printing searches, a set listing, and card
//! face images. It rejects requests without a `User-Agent` identifying the
//! caller and an explicit `Accept: application/json`.

use crate::catalog::card::PrintingRecord;
use crate::error::{Error, Result};

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream catalog API.
    pub base_url: String,

    /// User agent sent with every request, including a contact address.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scryfall.com".to_string(),
            user_agent: concat!(
                "cardlens/",
                env!("CARGO_PKG_VERSION"),
                " (scanner@cardlens.app)"
            )
            .to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }
}

/// One page of a printings search.
#[derive(Debug)]
pub enum PageFetch {
    /// The set exists; here are its printings and the next page, if any.
    Page {
        records: Vec<PrintingRecord>,
        next_page: Option<String>,
    },

    /// The upstream answered 400 or 404: the set does not exist there.
    MissingSet,
}

/// A set as listed by the upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct SetSummary {
    /// Lower-case set code.
    pub code: String,

    /// Upstream set classification.
    #[serde(default)]
    pub set_type: String,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<CardJson>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Deserialize)]
struct SetsPage {
    #[serde(default)]
    data: Vec<SetSummary>,
}

#[derive(Deserialize)]
struct CardJson {
    id: String,
    #[serde(default)]
    oracle_id: Option<String>,
    name: String,
    set: String,
    collector_number: String,
    #[serde(default)]
    released_at: Option<String>,
    #[serde(default)]
    set_type: Option<String>,
    #[serde(default)]
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Option<Vec<CardFace>>,
}

#[derive(Deserialize)]
struct CardFace {
    #[serde(default)]
    image_uris: Option<ImageUris>,
}

#[derive(Deserialize)]
struct ImageUris {
    #[serde(default)]
    normal: Option<String>,
}

impl CardJson {
    /// Convert an upstream card into an ingestion record.
    ///
    /// Rows with unparseable identifiers or no usable face image are dropped;
    /// multi-face cards fall back to the front face's image.
    fn into_record(self) -> Option<PrintingRecord> {
        let printing_id = Uuid::parse_str(&self.id).ok()?;
        let oracle_id = self.oracle_id.as_deref().and_then(|s| Uuid::parse_str(s).ok())?;

        let image_url = self
            .image_uris
            .as_ref()
            .and_then(|uris| uris.normal.clone())
            .or_else(|| {
                self.card_faces
                    .as_ref()
                    .and_then(|faces| faces.first())
                    .and_then(|face| face.image_uris.as_ref())
                    .and_then(|uris| uris.normal.clone())
            })?;

        Some(
            PrintingRecord::new(printing_id, oracle_id, self.name)
                .with_set(self.set, self.collector_number)
                .with_image_url(image_url)
                .with_released_at(parse_release_date(self.released_at.as_deref()))
                .with_set_type(self.set_type.unwrap_or_default()),
        )
    }
}

/// Parse an upstream release date. Unparseable dates sink to the minimum
/// representable instant so the printing never wins the latest flag.
fn parse_release_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// HTTP client for the upstream catalog.
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a client with the given configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// The first-page search URL for all printings of a set.
    pub fn search_url(&self, set_code: &str) -> String {
        format!(
            "{}/cards/search?q=e:{}&unique=prints&include_extras=false",
            self.config.base_url,
            set_code.to_lowercase()
        )
    }

    /// Fetch one page of a printings search.
    ///
    /// 400 and 404 mean the set does not exist upstream; any other non-2xx
    /// status is an error carrying the response body.
    pub async fn fetch_printings_page(&self, url: &str) -> Result<PageFetch> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                debug!(url, "Upstream reports no such set");
                return Ok(PageFetch::MissingSet);
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::upstream(format!("{status}: {body}")));
            }
        }

        let page: SearchPage = response.json().await?;
        let total = page.data.len();
        let records: Vec<PrintingRecord> = page
            .data
            .into_iter()
            .filter_map(CardJson::into_record)
            .collect();

        if records.len() < total {
            warn!(
                skipped = total - records.len(),
                "Dropped upstream rows without usable ids or images"
            );
        }

        Ok(PageFetch::Page {
            records,
            next_page: page.next_page,
        })
    }

    /// Fetch the full set listing.
    pub async fn list_sets(&self) -> Result<Vec<SetSummary>> {
        let url = format!("{}/sets", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!("{status}: {body}")));
        }

        let page: SetsPage = response.json().await?;
        Ok(page.data)
    }

    /// Download a card face image.
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "image fetch failed with {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_lowercases_the_set_code() {
        let client = UpstreamClient::new(UpstreamConfig::default()).unwrap();
        assert_eq!(
            client.search_url("M11"),
            "https://api.scryfall.com/cards/search?q=e:m11&unique=prints&include_extras=false"
        );
    }

    #[test]
    fn release_dates_parse_or_sink_to_the_minimum() {
        let parsed = parse_release_date(Some("2010-07-16"));
        assert_eq!(parsed.to_rfc3339(), "2010-07-16T00:00:00+00:00");

        assert_eq!(parse_release_date(Some("not a date")), DateTime::<Utc>::MIN_UTC);
        assert_eq!(parse_release_date(None), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn card_json_conversion_skips_unusable_rows() {
        let full: CardJson = serde_json::from_value(serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "oracle_id": "22222222-2222-2222-2222-222222222222",
            "name": "Lightning Bolt",
            "set": "m11",
            "collector_number": "149",
            "released_at": "2010-07-16",
            "set_type": "core",
            "image_uris": { "normal": "https://img.example/bolt.jpg" }
        }))
        .unwrap();
        let record = full.into_record().unwrap();
        assert_eq!(record.set_code, "m11");
        assert_eq!(record.image_url.as_deref(), Some("https://img.example/bolt.jpg"));

        // Multi-face card without top-level images uses the front face.
        let faces: CardJson = serde_json::from_value(serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "oracle_id": "22222222-2222-2222-2222-222222222222",
            "name": "Delver of Secrets // Insectile Aberration",
            "set": "isd",
            "collector_number": "51",
            "card_faces": [
                { "image_uris": { "normal": "https://img.example/delver.jpg" } },
                { "image_uris": { "normal": "https://img.example/aberration.jpg" } }
            ]
        }))
        .unwrap();
        let record = faces.into_record().unwrap();
        assert_eq!(
            record.image_url.as_deref(),
            Some("https://img.example/delver.jpg")
        );

        // No oracle id: token-like rows are skipped.
        let token: CardJson = serde_json::from_value(serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "name": "Goblin Token",
            "set": "tm11",
            "collector_number": "1",
            "image_uris": { "normal": "https://img.example/goblin.jpg" }
        }))
        .unwrap();
        assert!(token.into_record().is_none());

        // No image anywhere: nothing to embed, skipped.
        let imageless: CardJson = serde_json::from_value(serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "oracle_id": "22222222-2222-2222-2222-222222222222",
            "name": "Mystery Card",
            "set": "m11",
            "collector_number": "150"
        }))
        .unwrap();
        assert!(imageless.into_record().is_none());
    }
}
