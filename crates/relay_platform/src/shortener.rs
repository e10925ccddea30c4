#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use crate::{SecretString, Shortener};

#[derive(Debug, Clone)]
pub struct ShortenerConfig {
	pub endpoint: String,
	pub signature: Option<SecretString>,
	pub timeout: Duration,
}

impl Default for ShortenerConfig {
	fn default() -> Self {
		Self {
			endpoint: "https://therelay.cc/yourls-api.php".to_string(),
			signature: None,
			timeout: Duration::from_secs(10),
		}
	}
}

#[derive(Debug, Deserialize)]
struct ShortUrlResponse {
	shorturl: Option<String>,
}

/// YOURLS `action=shorturl` client.
#[derive(Debug, Clone)]
pub struct YourlsClient {
	endpoint: String,
	signature: Option<SecretString>,
	client: reqwest::Client,
}

impl YourlsClient {
	pub fn new(cfg: ShortenerConfig) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(cfg.timeout)
			.build()
			.context("build shortener http client")?;
		Ok(Self {
			endpoint: cfg.endpoint,
			signature: cfg.signature,
			client,
		})
	}
}

#[async_trait]
impl Shortener for YourlsClient {
	async fn shorten(&self, url: &str) -> anyhow::Result<String> {
		let signature = self.signature.as_ref().map(SecretString::expose).unwrap_or_default();
		let resp = self
			.client
			.get(&self.endpoint)
			.query(&[
				("signature", signature),
				("action", "shorturl"),
				("url", url),
				("format", "json"),
			])
			.send()
			.await
			.context("yourls shorturl")?;

		// YOURLS answers 400 for an already-shortened URL but still includes `shorturl`.
		let status = resp.status();
		let body: ShortUrlResponse = resp
			.json()
			.await
			.with_context(|| format!("parse yourls response (status={status})"))?;

		body.shorturl
			.filter(|s| !s.trim().is_empty())
			.ok_or_else(|| anyhow!("yourls response has no shorturl (status={status})"))
	}
}
