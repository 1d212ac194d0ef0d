//! Wire model of one search-page response.
//!
//! Only the envelope is typed. Individual results stay loosely typed
//! (`RawRecord`) because their nested layout drifts between upstream releases;
//! the normalizer walks fallback paths over them instead.

use serde::Deserialize;
use serde_json::Value;

/// One unvalidated listing payload as received from the source.
pub type RawRecord = Value;

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub cat1: SearchCategory,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCategory {
    pub search_results: SearchResults,
    #[serde(default)]
    pub search_list: Option<SearchList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub list_results: Option<Vec<RawRecord>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchList {
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_result_count: Option<u64>,
}

impl SearchResponse {
    pub fn total_pages(&self) -> Option<u32> {
        self.cat1.search_list.as_ref().and_then(|l| l.total_pages)
    }

    pub fn total_result_count(&self) -> Option<u64> {
        self.cat1.search_list.as_ref().and_then(|l| l.total_result_count)
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        self.cat1.search_results.list_results.unwrap_or_default()
    }
}
