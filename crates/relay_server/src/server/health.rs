#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

/// Liveness flags shared between the event loop and the health server.
#[derive(Clone, Default)]
pub struct HealthState {
	irc_registered: Arc<AtomicBool>,
	channels_joined: Arc<AtomicBool>,
	feed_connected: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_irc_registered(&self, v: bool) {
		self.irc_registered.store(v, Ordering::Relaxed);
	}

	pub fn set_channels_joined(&self, v: bool) {
		self.channels_joined.store(v, Ordering::Relaxed);
	}

	pub fn set_feed_connected(&self, v: bool) {
		self.feed_connected.store(v, Ordering::Relaxed);
	}

	pub fn is_feed_connected(&self) -> bool {
		self.feed_connected.load(Ordering::Relaxed)
	}

	/// Registered with the chat server and initial channels joined.
	pub fn is_ready(&self) -> bool {
		self.irc_registered.load(Ordering::Relaxed) && self.channels_joined.load(Ordering::Relaxed)
	}

	fn detail(&self) -> serde_json::Value {
		serde_json::json!({
			"irc_registered": self.irc_registered.load(Ordering::Relaxed),
			"channels_joined": self.channels_joined.load(Ordering::Relaxed),
			"feed_connected": self.is_feed_connected(),
		})
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req: Request<Incoming>| {
				let state = state.clone();
				async move { Ok::<_, hyper::Error>(health_response(req.method(), req.uri().path(), &state)) }
			});
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn health_response(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	if method != Method::GET {
		return Response::builder()
			.status(StatusCode::METHOD_NOT_ALLOWED)
			.body(Full::new(Bytes::new()))
			.unwrap();
	}

	match path {
		"/healthz" => Response::builder()
			.status(StatusCode::OK)
			.body(Full::new(Bytes::from_static(b"ok")))
			.unwrap(),
		"/readyz" => {
			let status = if state.is_ready() {
				StatusCode::OK
			} else {
				StatusCode::SERVICE_UNAVAILABLE
			};
			Response::builder()
				.status(status)
				.header(CONTENT_TYPE, "application/json")
				.body(Full::new(Bytes::from(state.detail().to_string())))
				.unwrap()
		}
		_ => Response::builder()
			.status(StatusCode::NOT_FOUND)
			.body(Full::new(Bytes::new()))
			.unwrap(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn readiness_needs_registration_and_channels() {
		let state = HealthState::new();
		let resp = health_response(&Method::GET, "/readyz", &state);
		assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

		state.set_irc_registered(true);
		assert!(!state.is_ready());
		state.set_channels_joined(true);
		assert!(state.is_ready());
		let resp = health_response(&Method::GET, "/readyz", &state);
		assert_eq!(resp.status(), StatusCode::OK);
	}

	#[test]
	fn liveness_and_unknown_paths() {
		let state = HealthState::new();
		assert_eq!(health_response(&Method::GET, "/healthz", &state).status(), StatusCode::OK);
		assert_eq!(health_response(&Method::GET, "/nope", &state).status(), StatusCode::NOT_FOUND);
		assert_eq!(
			health_response(&Method::POST, "/healthz", &state).status(),
			StatusCode::METHOD_NOT_ALLOWED
		);
	}

	#[test]
	fn detail_reports_every_flag() {
		let state = HealthState::new();
		state.set_feed_connected(true);
		let detail = state.detail();
		assert_eq!(detail["feed_connected"], true);
		assert_eq!(detail["irc_registered"], false);
	}
}
