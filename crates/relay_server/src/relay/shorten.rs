#![forbid(unsafe_code)]

use std::sync::Arc;

use relay_platform::Shortener;
use tracing::{debug, warn};

/// Result of a best-effort shortening attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortenOutcome {
	Shortened(String),
	/// Shortening failed; carries the (possibly CDN-rewritten) input.
	Fallback(String),
}

impl ShortenOutcome {
	pub fn into_url(self) -> String {
		match self {
			Self::Shortened(u) | Self::Fallback(u) => u,
		}
	}
}

/// CDN rewrite plus remote shortening with fallback to the input URL.
#[derive(Clone)]
pub struct UrlShortener {
	remote: Arc<dyn Shortener>,
	cdn_marker: String,
	proxy_template: String,
}

impl UrlShortener {
	pub fn new(remote: Arc<dyn Shortener>, cdn_marker: impl Into<String>, proxy_template: impl Into<String>) -> Self {
		Self {
			remote,
			cdn_marker: cdn_marker.into(),
			proxy_template: proxy_template.into(),
		}
	}

	/// Route CDN-hosted images through the image proxy.
	pub fn rewrite_cdn(&self, url: &str) -> String {
		if self.cdn_marker.is_empty() || !url.contains(&self.cdn_marker) {
			return url.to_string();
		}
		let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
		self.proxy_template.replace("{url}", &encoded)
	}

	pub async fn shorten(&self, image_url: &str) -> ShortenOutcome {
		let url = self.rewrite_cdn(image_url);
		match self.remote.shorten(&url).await {
			Ok(short) => {
				debug!(from = %url, to = %short, "shortener: shortened");
				ShortenOutcome::Shortened(short)
			}
			Err(e) => {
				metrics::counter!("relay_shorten_fallback_total").increment(1);
				warn!(url = %url, error = %e, "shortener: falling back to unshortened url");
				ShortenOutcome::Fallback(url)
			}
		}
	}
}
