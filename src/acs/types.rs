use crate::ledger::{ActiveContract, CreatedEvent, EventFormat, Filters, GatewayError, Offset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// One observer's filtered view of the active contract set.
///
/// Either a template or an interface scopes the view, never both. A key
/// without either selects every template and requires a party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcsKey {
	party: Option<String>,
	template_id: Option<String>,
	interface_id: Option<String>,
}

impl AcsKey {
	pub fn new(
		party: Option<&str>,
		template_id: Option<&str>,
		interface_id: Option<&str>,
	) -> Result<Self, AcsError> {
		match (party, template_id, interface_id) {
			(_, Some(_), Some(_)) => Err(AcsError::InvalidKey(
				"template and interface filters are mutually exclusive".to_string(),
			)),
			(None, None, None) => Err(AcsError::InvalidKey(
				"a key without template or interface needs a party".to_string(),
			)),
			_ => Ok(Self {
				party: party.map(str::to_string),
				template_id: template_id.map(str::to_string),
				interface_id: interface_id.map(str::to_string),
			}),
		}
	}

	pub fn for_template(party: Option<&str>, template_id: &str) -> Self {
		Self {
			party: party.map(str::to_string),
			template_id: Some(template_id.to_string()),
			interface_id: None,
		}
	}

	pub fn for_interface(party: Option<&str>, interface_id: &str) -> Self {
		Self {
			party: party.map(str::to_string),
			template_id: None,
			interface_id: Some(interface_id.to_string()),
		}
	}

	/// Every template visible to `party`.
	pub fn for_party(party: &str) -> Self {
		Self {
			party: Some(party.to_string()),
			template_id: None,
			interface_id: None,
		}
	}

	pub fn party(&self) -> Option<&str> {
		self.party.as_deref()
	}

	pub fn template_id(&self) -> Option<&str> {
		self.template_id.as_deref()
	}

	pub fn interface_id(&self) -> Option<&str> {
		self.interface_id.as_deref()
	}

	/// Stable cache key for this view on the ledger at `endpoint`.
	pub fn fingerprint(&self, endpoint: &str) -> String {
		format!(
			"{}_{}_T:{}_I:{}",
			endpoint,
			self.party.as_deref().unwrap_or("ANY"),
			self.template_id.as_deref().unwrap_or("()"),
			self.interface_id.as_deref().unwrap_or("()"),
		)
	}

	/// Filter for snapshot and delta reads of this view.
	pub fn event_format(&self) -> EventFormat {
		let filters = match (&self.template_id, &self.interface_id) {
			(Some(template_id), _) => Filters::template(template_id),
			(None, Some(interface_id)) => Filters::interfaces(&[interface_id]),
			(None, None) => Filters::default(),
		};
		match &self.party {
			Some(party) => EventFormat {
				filters_by_party: BTreeMap::from([(party.clone(), filters)]),
				filters_for_any_party: None,
				verbose: false,
			},
			None => EventFormat {
				filters_by_party: BTreeMap::new(),
				filters_for_any_party: Some(filters),
				verbose: false,
			},
		}
	}
}

/// What one delta does to the active set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaChange {
	Created(CreatedEvent),
	#[serde(rename_all = "camelCase")]
	Archived { contract_id: String },
}

/// A create or archive observed on the update stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcUpdateEvent {
	pub offset: Offset,
	pub change: DeltaChange,
	#[serde(default)]
	pub workflow_id: String,
	#[serde(default)]
	pub synchronizer_id: String,
}

impl AcUpdateEvent {
	pub fn created(&self) -> Option<&CreatedEvent> {
		match &self.change {
			DeltaChange::Created(created) => Some(created),
			DeltaChange::Archived { .. } => None,
		}
	}

	pub fn archived_contract_id(&self) -> Option<&str> {
		match &self.change {
			DeltaChange::Created(_) => None,
			DeltaChange::Archived { contract_id } => Some(contract_id),
		}
	}
}

/// A baseline snapshot plus the deltas observed since.
///
/// States are never mutated in place once published; every step builds a
/// new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcsSnapshotState {
	pub baseline_offset: Offset,
	pub baseline_contracts: Vec<ActiveContract>,
	pub last_seen_offset: Offset,
	pub pending_deltas: Vec<AcUpdateEvent>,
}

impl AcsSnapshotState {
	pub fn from_baseline(offset: Offset, contracts: Vec<ActiveContract>) -> Self {
		Self {
			baseline_offset: offset,
			baseline_contracts: contracts,
			last_seen_offset: offset,
			pending_deltas: Vec::new(),
		}
	}

	/// `baseline <= last_seen`, and every pending delta lies after the baseline.
	pub fn is_consistent(&self) -> bool {
		self.baseline_offset <= self.last_seen_offset
			&& self
				.pending_deltas
				.iter()
				.all(|d| d.offset > self.baseline_offset)
	}

	/// Active contracts at `offset`: the baseline plus created deltas, minus
	/// archived deltas, counting only deltas at or before `offset`.
	///
	/// Created deltas are appended in offset order so the result does not
	/// depend on the order deltas were recorded in.
	pub fn contracts_at(&self, offset: Offset) -> Vec<ActiveContract> {
		let visible = || self.pending_deltas.iter().filter(|d| d.offset <= offset);
		let archived: HashSet<&str> = visible()
			.filter_map(AcUpdateEvent::archived_contract_id)
			.collect();

		let mut created: Vec<&AcUpdateEvent> = visible().filter(|d| d.created().is_some()).collect();
		created.sort_by(|a, b| {
			a.offset
				.cmp(&b.offset)
				.then_with(|| a.created().map(|c| c.node_id).cmp(&b.created().map(|c| c.node_id)))
		});

		self.baseline_contracts
			.iter()
			.cloned()
			.chain(created.into_iter().filter_map(|delta| {
				delta.created().map(|created| ActiveContract {
					created_event: created.clone(),
					synchronizer_id: delta.synchronizer_id.clone(),
					workflow_id: delta.workflow_id.clone(),
					// Not reported on the update stream.
					reassignment_counter: 0,
				})
			}))
			.filter(|contract| !archived.contains(contract.contract_id()))
			.collect()
	}

	/// Fold every delta at or before `offset` into a new baseline.
	///
	/// A target at or before the current baseline leaves the state unchanged.
	pub fn compacted(&self, offset: Offset) -> Self {
		if offset <= self.baseline_offset {
			return self.clone();
		}
		Self {
			baseline_offset: offset,
			baseline_contracts: self.contracts_at(offset),
			last_seen_offset: self.last_seen_offset.max(offset),
			pending_deltas: self
				.pending_deltas
				.iter()
				.filter(|d| d.offset > offset)
				.cloned()
				.collect(),
		}
	}
}

/// Tuning for one synchronizer.
#[derive(Debug, Clone)]
pub struct AcsConfig {
	/// Pending deltas tolerated before the next update compacts them.
	pub max_events_before_prune: usize,
	/// Deltas this close to the last seen offset survive compaction.
	pub safe_offset_delta_for_prune: Offset,
	/// Page size for delta reads.
	pub max_updates_to_fetch: usize,
	/// Deadline for the first element of a streaming snapshot read.
	pub first_element_timeout: Duration,
}

impl Default for AcsConfig {
	fn default() -> Self {
		Self {
			max_events_before_prune: 150,
			safe_offset_delta_for_prune: 200,
			max_updates_to_fetch: 100,
			first_element_timeout: Duration::from_secs(10),
		}
	}
}

/// Error types for active contract synchronization
#[derive(Debug, thiserror::Error)]
pub enum AcsError {
	#[error("Gateway error: {0}")]
	Gateway(#[from] GatewayError),

	#[error("Invalid ACS key: {0}")]
	InvalidKey(String),

	#[error("Offset {requested} is before the baseline at {baseline}")]
	OffsetBeforeBaseline { requested: Offset, baseline: Offset },

	#[error("No element from the snapshot stream within {0:?}")]
	FirstElementTimeout(Duration),

	#[error("Gave up reading offset {offset} after {attempts} attempts")]
	RetriesExhausted { offset: Offset, attempts: usize },
}
