//! In-memory gateway serving fixtures and recording every call.

use super::gateway::{ContractStream, LedgerGateway};
use super::stream_switch::StreamSwitch;
use super::types::*;
use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
	ActiveContracts { offset: Offset },
	ActiveContractsStream { offset: Offset },
	Updates { begin_exclusive: Offset, end_inclusive: Offset, limit: usize },
	EventsByContractId { contract_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
	/// Streaming reads report `StreamingUnsupported`.
	Unsupported,
	/// Streaming reads yield the snapshot.
	Serve,
	/// The stream never yields anything.
	Hang,
	/// Opening the stream fails.
	Fail,
}

pub struct MockGateway {
	endpoint: String,
	snapshots: Mutex<BTreeMap<Offset, Vec<ActiveContract>>>,
	updates: Mutex<Vec<Update>>,
	lookups: Mutex<HashMap<String, ContractEvents>>,
	stream_mode: StreamMode,
	switch: Option<StreamSwitch>,
	calls: Mutex<Vec<GatewayCall>>,
}

impl MockGateway {
	pub fn new() -> Self {
		Self {
			endpoint: "http://mock-ledger".to_string(),
			snapshots: Mutex::new(BTreeMap::new()),
			updates: Mutex::new(Vec::new()),
			lookups: Mutex::new(HashMap::new()),
			stream_mode: StreamMode::Unsupported,
			switch: None,
			calls: Mutex::new(Vec::new()),
		}
	}

	pub fn with_streaming(mut self, mode: StreamMode) -> Self {
		self.stream_mode = mode;
		self.switch = Some(StreamSwitch::new());
		self
	}

	/// The snapshot served for every offset at or after `offset`.
	pub fn with_snapshot(self, offset: Offset, contracts: Vec<ActiveContract>) -> Self {
		self.snapshots.lock().unwrap().insert(offset, contracts);
		self
	}

	pub fn with_updates(self, updates: Vec<Update>) -> Self {
		self.updates.lock().unwrap().extend(updates);
		self
	}

	pub fn with_lookup(self, contract_id: &str, events: ContractEvents) -> Self {
		self.lookups
			.lock()
			.unwrap()
			.insert(contract_id.to_string(), events);
		self
	}

	pub fn push_update(&self, update: Update) {
		self.updates.lock().unwrap().push(update);
	}

	pub fn calls(&self) -> Vec<GatewayCall> {
		self.calls.lock().unwrap().clone()
	}

	pub fn snapshot_offsets(&self) -> Vec<Offset> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				GatewayCall::ActiveContracts { offset } => Some(offset),
				_ => None,
			})
			.collect()
	}

	pub fn lookup_count(&self) -> usize {
		self.calls()
			.iter()
			.filter(|call| matches!(call, GatewayCall::EventsByContractId { .. }))
			.count()
	}

	fn record(&self, call: GatewayCall) {
		self.calls.lock().unwrap().push(call);
	}

	fn snapshot_at(&self, offset: Offset) -> Vec<ActiveContract> {
		self.snapshots
			.lock()
			.unwrap()
			.range(..=offset)
			.next_back()
			.map(|(_, contracts)| contracts.clone())
			.unwrap_or_default()
	}
}

fn update_offset(update: &Update) -> Offset {
	match update {
		Update::Transaction { value } => value.offset,
		Update::OffsetCheckpoint { value } => value.offset,
		Update::Reassignment { value } | Update::TopologyTransaction { value } => {
			value.get("offset").and_then(Value::as_u64).unwrap_or(0)
		}
	}
}

#[async_trait]
impl LedgerGateway for MockGateway {
	fn endpoint(&self) -> &str {
		&self.endpoint
	}

	fn stream_switch(&self) -> Option<&StreamSwitch> {
		self.switch.as_ref()
	}

	async fn active_contracts(
		&self,
		offset: Offset,
		_format: &EventFormat,
	) -> Result<Vec<ActiveContract>, GatewayError> {
		self.record(GatewayCall::ActiveContracts { offset });
		tokio::task::yield_now().await;
		Ok(self.snapshot_at(offset))
	}

	async fn active_contracts_stream(
		&self,
		offset: Offset,
		_format: &EventFormat,
	) -> Result<ContractStream, GatewayError> {
		self.record(GatewayCall::ActiveContractsStream { offset });
		match self.stream_mode {
			StreamMode::Unsupported => Err(GatewayError::StreamingUnsupported),
			StreamMode::Serve => {
				let items: Vec<Result<ActiveContract, GatewayError>> =
					self.snapshot_at(offset).into_iter().map(Ok).collect();
				Ok(Box::pin(stream::iter(items)))
			}
			StreamMode::Hang => Ok(Box::pin(stream::pending::<
				Result<ActiveContract, GatewayError>,
			>())),
			StreamMode::Fail => Err(GatewayError::Url("connection refused".to_string())),
		}
	}

	async fn updates(
		&self,
		begin_exclusive: Offset,
		end_inclusive: Offset,
		_format: &EventFormat,
		limit: usize,
	) -> Result<Vec<Update>, GatewayError> {
		self.record(GatewayCall::Updates {
			begin_exclusive,
			end_inclusive,
			limit,
		});
		// Suspend like a network read so concurrent callers can interleave.
		tokio::task::yield_now().await;
		let mut page: Vec<Update> = self
			.updates
			.lock()
			.unwrap()
			.iter()
			.filter(|u| {
				let offset = update_offset(u);
				offset > begin_exclusive && offset <= end_inclusive
			})
			.cloned()
			.collect();
		page.sort_by_key(update_offset);
		page.truncate(limit);
		Ok(page)
	}

	async fn events_by_contract_id(
		&self,
		contract_id: &str,
		_format: &EventFormat,
	) -> Result<Option<ContractEvents>, GatewayError> {
		self.record(GatewayCall::EventsByContractId {
			contract_id: contract_id.to_string(),
		});
		Ok(self.lookups.lock().unwrap().get(contract_id).cloned())
	}
}

pub fn created_event(contract_id: &str, template_id: &str, offset: Offset) -> CreatedEvent {
	CreatedEvent {
		offset,
		node_id: 0,
		contract_id: contract_id.to_string(),
		template_id: template_id.to_string(),
		package_name: "pkg".to_string(),
		create_argument: Some(json!({})),
		interface_views: Vec::new(),
		witness_parties: Vec::new(),
		signatories: Vec::new(),
		observers: Vec::new(),
		created_at: None,
	}
}

pub fn active_contract(contract_id: &str, offset: Offset) -> ActiveContract {
	ActiveContract {
		created_event: created_event(contract_id, "#pkg:Mod:Tpl", offset),
		synchronizer_id: "sync::1".to_string(),
		workflow_id: String::new(),
		reassignment_counter: 0,
	}
}

pub fn archived_event(contract_id: &str, offset: Offset) -> ArchivedEvent {
	ArchivedEvent {
		offset,
		node_id: 0,
		contract_id: contract_id.to_string(),
		template_id: "#pkg:Mod:Tpl".to_string(),
		package_name: "pkg".to_string(),
		witness_parties: Vec::new(),
		implemented_interfaces: Vec::new(),
		acting_parties: Vec::new(),
	}
}

pub fn transaction(offset: Offset, events: Vec<Event>) -> JsTransaction {
	JsTransaction {
		update_id: format!("update-{offset}"),
		command_id: None,
		workflow_id: None,
		effective_at: None,
		offset,
		events,
		synchronizer_id: "sync::1".to_string(),
		record_time: "2025-01-01T00:00:00Z".to_string(),
	}
}

pub fn tx_update(offset: Offset, events: Vec<Event>) -> Update {
	Update::Transaction {
		value: transaction(offset, events),
	}
}

pub fn checkpoint(offset: Offset) -> Update {
	Update::OffsetCheckpoint {
		value: OffsetCheckpoint {
			offset,
			synchronizer_times: Vec::new(),
		},
	}
}
