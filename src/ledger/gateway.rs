//! Abstract ledger access used by the ACS synchronizer and the transaction parser.

use super::stream_switch::StreamSwitch;
use super::types::*;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of active contracts produced by a streaming snapshot read.
/// Dropping the stream tears down the underlying connection.
pub type ContractStream =
	Pin<Box<dyn Stream<Item = Result<ActiveContract, GatewayError>> + Send>>;

/// Read operations the reconciliation layer needs from a ledger.
///
/// Implementations own transport, authentication and any retry policy;
/// callers treat every error returned here as final.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
	/// Stable identifier of the ledger this gateway talks to, used to scope cache keys.
	fn endpoint(&self) -> &str;

	/// Back-off switch for streaming reads, if this gateway supports them.
	fn stream_switch(&self) -> Option<&StreamSwitch> {
		None
	}

	/// One-shot snapshot of the contracts active at `offset`.
	async fn active_contracts(
		&self,
		offset: Offset,
		format: &EventFormat,
	) -> Result<Vec<ActiveContract>, GatewayError>;

	/// Streaming snapshot of the contracts active at `offset`.
	async fn active_contracts_stream(
		&self,
		_offset: Offset,
		_format: &EventFormat,
	) -> Result<ContractStream, GatewayError> {
		Err(GatewayError::StreamingUnsupported)
	}

	/// Updates in `(begin_exclusive, end_inclusive]`, at most `limit` of them.
	async fn updates(
		&self,
		begin_exclusive: Offset,
		end_inclusive: Offset,
		format: &EventFormat,
		limit: usize,
	) -> Result<Vec<Update>, GatewayError>;

	/// Point lookup of a contract's create/archive events. `Ok(None)` means the
	/// ledger reported the contract as not found for the requesting parties.
	async fn events_by_contract_id(
		&self,
		contract_id: &str,
		format: &EventFormat,
	) -> Result<Option<ContractEvents>, GatewayError>;
}
