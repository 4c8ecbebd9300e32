//! HTTP/WebSocket client for the JSON Ledger API.
//!
//! Implements [`LedgerGateway`] on top of the `/v2` endpoints: one-shot and
//! streamed active-contract reads, bounded update pages and point lookups by
//! contract id. Requests are not retried here.

use super::gateway::{ContractStream, LedgerGateway};
use super::stream_switch::StreamSwitch;
use super::types::*;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info};

const ACTIVE_CONTRACTS_PATH: &str = "/v2/state/active-contracts";
const UPDATES_PATH: &str = "/v2/updates/flats";
const EVENTS_BY_CONTRACT_ID_PATH: &str = "/v2/events/events-by-contract-id";

/// JSON Ledger API client
pub struct JsonLedgerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the HTTP API, without trailing slash.
	api_url: String,
	/// Base URL for WebSocket reads; streaming is unavailable when absent.
	ws_url: Option<String>,
	/// Bearer token sent with every request.
	token: Option<String>,
	/// Server-side idle timeout for update pages.
	stream_idle_timeout_ms: u64,
	stream_switch: StreamSwitch,
}

impl JsonLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `api_url` - The HTTP endpoint of the JSON Ledger API.
	/// * `ws_url` - The WebSocket endpoint, if streaming reads should be used.
	/// * `token` - Optional bearer token.
	///
	/// # Errors
	/// Returns `GatewayError::Http` if the HTTP client cannot be built.
	pub fn new(
		api_url: String,
		ws_url: Option<String>,
		token: Option<String>,
	) -> Result<Self, GatewayError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			api_url: api_url.trim_end_matches('/').to_string(),
			ws_url: ws_url.map(|url| url.trim_end_matches('/').to_string()),
			token,
			stream_idle_timeout_ms: 1000,
			stream_switch: StreamSwitch::new(),
		})
	}

	pub fn with_stream_idle_timeout_ms(mut self, stream_idle_timeout_ms: u64) -> Self {
		self.stream_idle_timeout_ms = stream_idle_timeout_ms;
		self
	}

	/// POST a JSON body and decode the response, mapping non-success statuses
	/// to `GatewayError::Api`.
	async fn post<T: DeserializeOwned>(
		&self,
		path: &str,
		body: &Value,
		query: &[(&str, String)],
	) -> Result<T, GatewayError> {
		let url = format!("{}{}", self.api_url, path);
		debug!("POST {}", url);

		let mut request = self.http_client.post(&url).json(body).query(query);
		if let Some(token) = &self.token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await?;
		let status = response.status();
		if !status.is_success() {
			let text = response.text().await.unwrap_or_default();
			return Err(api_error(status, &text));
		}

		Ok(response.json::<T>().await?)
	}

	fn active_contracts_request(offset: Offset, format: &EventFormat) -> Value {
		json!({
			"activeAtOffset": offset,
			"verbose": false,
			"eventFormat": format,
		})
	}
}

/// Build a typed API error from an error response body.
fn api_error(status: StatusCode, body: &str) -> GatewayError {
	let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
	let code = parsed
		.get("code")
		.and_then(Value::as_str)
		.map(str::to_string)
		.unwrap_or_else(|| status.as_str().to_string());
	let message = parsed
		.get("cause")
		.and_then(Value::as_str)
		.unwrap_or(body)
		.to_string();

	GatewayError::Api {
		status: status.as_u16(),
		code,
		message,
		detail: parsed.get("context").cloned(),
	}
}

#[async_trait]
impl LedgerGateway for JsonLedgerClient {
	fn endpoint(&self) -> &str {
		&self.api_url
	}

	fn stream_switch(&self) -> Option<&StreamSwitch> {
		self.ws_url.as_ref().map(|_| &self.stream_switch)
	}

	async fn active_contracts(
		&self,
		offset: Offset,
		format: &EventFormat,
	) -> Result<Vec<ActiveContract>, GatewayError> {
		let responses: Vec<ActiveContractsResponse> = self
			.post(
				ACTIVE_CONTRACTS_PATH,
				&Self::active_contracts_request(offset, format),
				&[],
			)
			.await?;

		let contracts: Vec<ActiveContract> = responses
			.into_iter()
			.filter_map(ActiveContractsResponse::into_active_contract)
			.collect();
		info!(
			"Fetched {} active contracts at offset {}",
			contracts.len(),
			offset
		);
		Ok(contracts)
	}

	/// Stream active contracts over a WebSocket.
	///
	/// The stream ends when the server closes the socket. Frames that are not
	/// valid JSON are logged and skipped.
	async fn active_contracts_stream(
		&self,
		offset: Offset,
		format: &EventFormat,
	) -> Result<ContractStream, GatewayError> {
		let base = self
			.ws_url
			.as_ref()
			.ok_or(GatewayError::StreamingUnsupported)?;
		let url = format!("{}{}", base, ACTIVE_CONTRACTS_PATH);
		debug!("Attempting WebSocket connection to: {}", url);

		let mut request = url.clone().into_client_request()?;
		if let Some(token) = &self.token {
			request.headers_mut().insert(
				"Sec-WebSocket-Protocol",
				format!("jwt.token.{}, daml.ws.auth", token)
					.parse()
					.map_err(|_| {
						GatewayError::Url("Invalid WebSocket subprotocol header value".to_string())
					})?,
			);
		}

		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, ws_receiver) = ws_stream.split();

		ws_sender
			.send(Message::Text(
				Self::active_contracts_request(offset, format).to_string(),
			))
			.await?;

		// The sender half is moved into the stream so the socket lives until the
		// caller drops it.
		let stream = ws_receiver
			.take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
			.filter_map(move |msg| {
				let _keep_open = &ws_sender;
				let item = match msg {
					Ok(Message::Text(text)) => {
						match serde_json::from_str::<ActiveContractsResponse>(&text) {
							Ok(response) => response.into_active_contract().map(Ok),
							Err(e) => {
								error!("Invalid JSON in active contracts stream: {}", e);
								None
							}
						}
					}
					Ok(_) => None,
					Err(e) => Some(Err(GatewayError::WebSocket(e))),
				};
				future::ready(item)
			});

		Ok(Box::pin(stream))
	}

	async fn updates(
		&self,
		begin_exclusive: Offset,
		end_inclusive: Offset,
		format: &EventFormat,
		limit: usize,
	) -> Result<Vec<Update>, GatewayError> {
		let body = json!({
			"beginExclusive": begin_exclusive,
			"endInclusive": end_inclusive,
			"updateFormat": {
				"includeTransactions": {
					"eventFormat": format,
					"transactionShape": "TRANSACTION_SHAPE_ACS_DELTA",
				}
			},
			"verbose": false,
		});
		let query = [
			("limit", limit.to_string()),
			(
				"stream_idle_timeout_ms",
				self.stream_idle_timeout_ms.to_string(),
			),
		];

		let responses: Vec<UpdateResponse> = self.post(UPDATES_PATH, &body, &query).await?;
		debug!(
			"Fetched {} updates in ({}, {}]",
			responses.len(),
			begin_exclusive,
			end_inclusive
		);
		Ok(responses.into_iter().map(|r| r.update).collect())
	}

	async fn events_by_contract_id(
		&self,
		contract_id: &str,
		format: &EventFormat,
	) -> Result<Option<ContractEvents>, GatewayError> {
		let body = json!({
			"contractId": contract_id,
			"eventFormat": format,
		});

		match self
			.post::<ContractEvents>(EVENTS_BY_CONTRACT_ID_PATH, &body, &[])
			.await
		{
			Ok(events) => Ok(Some(events)),
			Err(GatewayError::Api { status: 404, .. }) => Ok(None),
			Err(e) if e.is_contract_not_found() => Ok(None),
			Err(e) => Err(e),
		}
	}
}
