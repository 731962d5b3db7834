// src/fetch.rs
//
// URI fetch port (SPEC_FULL.md §4.I). Default implementation for
// `FileCache::from_uri`'s injected fetcher, grounded on the blocking
// reqwest client other_examples/pex uses for "download bytes, cache by
// checksum" jobs.

use crate::error::{Error, Result};
use crate::file_cache::UriFetcher;
use std::time::Duration;

pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::io(e.to_string()))?;
        Ok(ReqwestFetcher { client })
    }
}

impl UriFetcher for ReqwestFetcher {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(uri)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::io(format!("GET {uri}: {e}")))?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::io(format!("read body of {uri}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
