//! Place listing, detail and search endpoints.
//!
//! These endpoints are public: requests go out without a bearer token and
//! bypass the renewal pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{LinkError, Result};

/// Place categories with their own list and detail endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Attraction,
    Restaurant,
    Cafe,
    Accommodation,
}

impl PlaceKind {
    pub const ALL: [PlaceKind; 4] = [
        Self::Attraction,
        Self::Restaurant,
        Self::Cafe,
        Self::Accommodation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attraction => "attraction",
            Self::Restaurant => "restaurant",
            Self::Cafe => "cafe",
            Self::Accommodation => "accommodation",
        }
    }
}

impl fmt::Display for PlaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaceKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LinkError::invalid_request(format!("unknown place kind '{s}'")))
    }
}

/// One hit from the keyword or address search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Remaining fields as returned by the server.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

pub(crate) fn area_list_path() -> String {
    "/place/main/area/list".to_string()
}

pub(crate) fn place_list_path(kind: PlaceKind) -> String {
    format!("/place/main/{kind}/list")
}

pub(crate) fn place_detail_path(kind: PlaceKind, id: &str) -> String {
    format!("/place/main/info/{kind}/{}", urlencoding::encode(id))
}

pub(crate) fn event_list_path() -> String {
    "/place/main/events".to_string()
}

pub(crate) fn places_by_area_path(area_id: &str) -> String {
    format!("/place/main/place/list/{}", urlencoding::encode(area_id))
}

pub(crate) fn keyword_search_path(keyword: &str) -> String {
    format!("/search/{}", urlencoding::encode(keyword))
}

pub(crate) fn address_search_path(address: &str) -> String {
    format!("/search/address/{}", urlencoding::encode(address))
}

/// Client for the public place endpoints.
#[derive(Debug, Clone)]
pub struct PlacesApi {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl PlacesApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn area_list(&self) -> Result<Value> {
        self.get(&area_list_path()).await
    }

    pub async fn place_list(&self, kind: PlaceKind) -> Result<Value> {
        self.get(&place_list_path(kind)).await
    }

    pub async fn place_detail(&self, kind: PlaceKind, id: &str) -> Result<Value> {
        self.get(&place_detail_path(kind, id)).await
    }

    pub async fn event_list(&self) -> Result<Value> {
        self.get(&event_list_path()).await
    }

    pub async fn places_by_area(&self, area_id: &str) -> Result<Value> {
        self.get(&places_by_area_path(area_id)).await
    }

    pub async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<SearchResult>> {
        self.get(&keyword_search_path(keyword)).await
    }

    pub async fn search_by_address(&self, address: &str) -> Result<Vec<SearchResult>> {
        self.get(&address_search_path(address)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Fetching");

        let mut builder = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LinkError::Status { status, body });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(PlaceKind::Attraction, "/place/main/attraction/list")]
    #[case(PlaceKind::Restaurant, "/place/main/restaurant/list")]
    #[case(PlaceKind::Cafe, "/place/main/cafe/list")]
    #[case(PlaceKind::Accommodation, "/place/main/accommodation/list")]
    fn test_place_list_path(#[case] kind: PlaceKind, #[case] expected: &str) {
        assert_eq!(place_list_path(kind), expected);
    }

    #[test]
    fn test_fixed_paths() {
        assert_eq!(area_list_path(), "/place/main/area/list");
        assert_eq!(event_list_path(), "/place/main/events");
        assert_eq!(places_by_area_path("11"), "/place/main/place/list/11");
        assert_eq!(
            place_detail_path(PlaceKind::Cafe, "42"),
            "/place/main/info/cafe/42"
        );
    }

    #[test]
    fn test_search_paths_are_encoded() {
        assert_eq!(
            keyword_search_path("경복궁 north"),
            "/search/%EA%B2%BD%EB%B3%B5%EA%B6%81%20north"
        );
        assert_eq!(
            address_search_path("Jongno-gu/1"),
            "/search/address/Jongno-gu%2F1"
        );
    }

    #[test]
    fn test_place_kind_parse() {
        assert_eq!("Cafe".parse::<PlaceKind>().unwrap(), PlaceKind::Cafe);
        assert!("museum".parse::<PlaceKind>().is_err());
        assert_eq!(PlaceKind::Accommodation.to_string(), "accommodation");
    }

    #[test]
    fn test_search_result_keeps_extra_fields() {
        let result: SearchResult = serde_json::from_value(json!({
            "id": 3,
            "name": "Gyeongbokgung",
            "address": "161 Sajik-ro",
            "category": "attraction"
        }))
        .unwrap();
        assert_eq!(result.id, 3);
        assert_eq!(result.extra.get("category"), Some(&json!("attraction")));
    }
}
