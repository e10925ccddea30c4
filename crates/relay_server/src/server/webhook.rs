#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use relay_platform::SecretString;
use relay_platform::irc::{BOLD, COLOR};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const INFO_PAGE: &str = "<!doctype html>\n<html><head><title>now-playing relay</title></head>\n<body>\n<h1>now-playing relay</h1>\n<p>POST boostagrams here as JSON with <code>Authorization: Bearer &lt;token&gt;</code>.\nEach one is announced in every channel the relay has joined.</p>\n</body></html>\n";

/// mIRC colour numbers used around the boost message.
const RED: &str = "04";
const WHITE: &str = "00";

#[derive(Debug, Error)]
pub enum WebhookError {
	#[error("unknown path")]
	NotFound,
	#[error("method not allowed")]
	MethodNotAllowed,
	#[error("missing or invalid bearer token")]
	Unauthorized,
	#[error("malformed body: {0}")]
	BadRequest(String),
	#[error("relay is not accepting messages")]
	Unavailable,
}

impl WebhookError {
	pub fn status(&self) -> StatusCode {
		match self {
			Self::NotFound => StatusCode::NOT_FOUND,
			Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
			Self::Unauthorized => StatusCode::UNAUTHORIZED,
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
			Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
		}
	}

	fn outcome(&self) -> &'static str {
		match self {
			Self::NotFound => "not_found",
			Self::MethodNotAllowed => "method_not_allowed",
			Self::Unauthorized => "unauthorized",
			Self::BadRequest(_) => "bad_request",
			Self::Unavailable => "unavailable",
		}
	}
}

/// Value-for-value payment notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Boostagram {
	#[serde(default)]
	pub message: Option<String>,
	#[serde(deserialize_with = "deserialize_msat")]
	pub value_msat_total: i64,
	#[serde(default)]
	pub sender: Option<String>,
	#[serde(default)]
	pub app: Option<String>,
	#[serde(default)]
	pub episode: Option<String>,
	#[serde(default)]
	pub remote_episode: Option<String>,
}

impl Boostagram {
	/// Whole sats, rounded down.
	pub fn sats(&self) -> i64 {
		self.value_msat_total.div_euclid(1000)
	}

	/// The chat line announced for this boost.
	pub fn chat_line(&self) -> String {
		let field = |v: &Option<String>| v.as_deref().unwrap_or_default().to_string();
		format!(
			"{BOLD}{sats}{BOLD} sats from {BOLD}{sender}{BOLD} via {app} | {episode} | {remote} | {COLOR}{RED}\"{message}\"{COLOR}{WHITE}",
			sats = self.sats(),
			sender = field(&self.sender),
			app = field(&self.app),
			episode = field(&self.episode),
			remote = field(&self.remote_episode),
			message = field(&self.message),
		)
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MsatValue {
	Int(i64),
	Float(f64),
	Text(String),
}

fn deserialize_msat<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
	match MsatValue::deserialize(d)? {
		MsatValue::Int(v) => Ok(v),
		MsatValue::Float(v) if v.is_finite() => Ok(v.floor() as i64),
		MsatValue::Float(v) => Err(serde::de::Error::custom(format!("invalid msat amount: {v}"))),
		MsatValue::Text(s) => {
			let s = s.trim();
			s.parse::<i64>()
				.or_else(|_| s.parse::<f64>().map(|f| f.floor() as i64))
				.map_err(|_| serde::de::Error::custom(format!("invalid msat amount: {s:?}")))
		}
	}
}

#[derive(Clone)]
pub struct WebhookState {
	auth_token: SecretString,
	broadcast_tx: mpsc::Sender<String>,
}

impl WebhookState {
	pub fn new(auth_token: SecretString, broadcast_tx: mpsc::Sender<String>) -> Self {
		Self {
			auth_token,
			broadcast_tx,
		}
	}
}

pub fn spawn_webhook_server(bind: SocketAddr, state: WebhookState) {
	tokio::spawn(async move {
		if let Err(err) = run_webhook_server(bind, state).await {
			warn!(error = %err, "webhook server stopped");
		}
	});
}

async fn run_webhook_server(bind: SocketAddr, state: WebhookState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	info!(%bind, "webhook listening");
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_webhook(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "webhook connection error");
			}
		});
	}
}

pub async fn handle_webhook<B>(req: Request<B>, state: WebhookState) -> Result<Response<Full<Bytes>>, Infallible>
where
	B: Body,
	B::Error: fmt::Display,
{
	let resp = match route(req, &state).await {
		Ok(resp) => {
			metrics::counter!("relay_webhook_requests_total", "outcome" => "ok").increment(1);
			resp
		}
		Err(err) => {
			metrics::counter!("relay_webhook_requests_total", "outcome" => err.outcome()).increment(1);
			debug!(error = %err, "webhook: rejected");
			Response::builder()
				.status(err.status())
				.body(Full::new(Bytes::new()))
				.unwrap()
		}
	};
	Ok(resp)
}

async fn route<B>(req: Request<B>, state: &WebhookState) -> Result<Response<Full<Bytes>>, WebhookError>
where
	B: Body,
	B::Error: fmt::Display,
{
	let (parts, body) = req.into_parts();
	if parts.uri.path() != "/" {
		return Err(WebhookError::NotFound);
	}

	match parts.method {
		Method::GET => {
			return Ok(Response::builder()
				.status(StatusCode::OK)
				.header(CONTENT_TYPE, "text/html; charset=utf-8")
				.body(Full::new(Bytes::from_static(INFO_PAGE.as_bytes())))
				.unwrap());
		}
		Method::POST => {}
		_ => return Err(WebhookError::MethodNotAllowed),
	}

	let token = parts
		.headers
		.get(AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.ok_or(WebhookError::Unauthorized)?;
	if !constant_time_eq(token.trim().as_bytes(), state.auth_token.expose().as_bytes()) {
		return Err(WebhookError::Unauthorized);
	}

	let body = match body.collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => return Err(WebhookError::BadRequest(err.to_string())),
	};
	let boost: Boostagram =
		serde_json::from_slice(&body).map_err(|e| WebhookError::BadRequest(e.to_string()))?;

	let line = boost.chat_line();
	state
		.broadcast_tx
		.try_send(line)
		.map_err(|_| WebhookError::Unavailable)?;
	info!(sats = boost.sats(), "webhook: boostagram queued");

	Ok(Response::builder()
		.status(StatusCode::OK)
		.body(Full::new(Bytes::new()))
		.unwrap())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
