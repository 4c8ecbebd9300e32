use crate::ledger::{GatewayError, Offset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Instrument a holding is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId {
	pub admin: String,
	pub id: String,
}

impl fmt::Display for InstrumentId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.admin, self.id)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingLock {
	#[serde(default)]
	pub holders: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_after: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}

/// Holding interface view as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
	pub owner: String,
	pub instrument_id: InstrumentId,
	pub amount: String,
	#[serde(default)]
	pub lock: Option<HoldingLock>,
	#[serde(default)]
	pub meta: Option<Value>,
}

/// A holding contract; `amount` is kept as the exact decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
	pub contract_id: String,
	pub owner: String,
	pub instrument_id: InstrumentId,
	pub amount: String,
	pub lock: Option<HoldingLock>,
	pub meta: Option<Value>,
}

impl Holding {
	pub fn from_view(contract_id: &str, view: HoldingView) -> Self {
		Self {
			contract_id: contract_id.to_string(),
			owner: view.owner,
			instrument_id: view.instrument_id,
			amount: view.amount,
			lock: view.lock,
			meta: view.meta,
		}
	}

	pub fn is_locked(&self) -> bool {
		self.lock.is_some()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsChange {
	pub creates: Vec<Holding>,
	pub archives: Vec<Holding>,
}

impl HoldingsChange {
	pub fn is_empty(&self) -> bool {
		self.creates.is_empty() && self.archives.is_empty()
	}

	/// Keep only the holdings matching `predicate`.
	pub fn filtered(&self, predicate: impl Fn(&Holding) -> bool) -> Self {
		Self {
			creates: self.creates.iter().filter(|h| predicate(*h)).cloned().collect(),
			archives: self.archives.iter().filter(|h| predicate(*h)).cloned().collect(),
		}
	}
}

/// Per-instrument aggregate of a holdings change, seen from one party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingsChangeSummary {
	pub instrument_id: InstrumentId,
	pub amount_change: String,
	pub num_inputs: usize,
	pub input_amount: String,
	pub num_outputs: usize,
	pub output_amount: String,
}

impl HoldingsChangeSummary {
	/// Placeholder used when an event has no change for a lock state.
	pub fn empty() -> Self {
		Self {
			instrument_id: InstrumentId {
				admin: String::new(),
				id: String::new(),
			},
			amount_change: "0".to_string(),
			num_inputs: 0,
			input_amount: "0".to_string(),
			num_outputs: 0,
			output_amount: "0".to_string(),
		}
	}
}

/// Token-standard metadata: `{"values": {key: value}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
	#[serde(default)]
	pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStandardChoice {
	pub name: String,
	pub choice_argument: Value,
	pub exercise_result: Value,
}

/// Fields shared by every label derived from a recognized choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceDetails {
	pub burn_amount: String,
	pub mint_amount: String,
	pub reason: Option<String>,
	pub token_standard_choice: Option<TokenStandardChoice>,
	pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverAmount {
	pub receiver: String,
	pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCreate {
	pub parent_choice: String,
	pub contract_id: String,
	pub offset: Offset,
	pub template_id: String,
	pub package_name: String,
	pub payload: Value,
	pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArchive {
	pub parent_choice: String,
	pub contract_id: String,
	pub offset: Offset,
	pub template_id: String,
	pub package_name: String,
	pub acting_parties: Vec<String>,
	pub payload: Value,
	pub meta: Metadata,
}

/// What a normalized event means to the observing party.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Label {
	TransferOut {
		#[serde(flatten)]
		details: ChoiceDetails,
		receiver_amounts: Vec<ReceiverAmount>,
	},
	TransferIn {
		#[serde(flatten)]
		details: ChoiceDetails,
		sender: String,
	},
	MergeSplit(ChoiceDetails),
	Burn(ChoiceDetails),
	Mint(ChoiceDetails),
	Unlock(ChoiceDetails),
	ExpireDust(ChoiceDetails),
	Create(RawCreate),
	Lock(RawCreate),
	Archive(RawArchive),
}

impl Label {
	pub fn type_name(&self) -> &'static str {
		match self {
			Label::TransferOut { .. } => "TransferOut",
			Label::TransferIn { .. } => "TransferIn",
			Label::MergeSplit(_) => "MergeSplit",
			Label::Burn(_) => "Burn",
			Label::Mint(_) => "Mint",
			Label::Unlock(_) => "Unlock",
			Label::ExpireDust(_) => "ExpireDust",
			Label::Create(_) => "Create",
			Label::Lock(_) => "Lock",
			Label::Archive(_) => "Archive",
		}
	}

	pub fn meta_mut(&mut self) -> &mut Metadata {
		match self {
			Label::TransferOut { details, .. } | Label::TransferIn { details, .. } => {
				&mut details.meta
			}
			Label::MergeSplit(details)
			| Label::Burn(details)
			| Label::Mint(details)
			| Label::Unlock(details)
			| Label::ExpireDust(details) => &mut details.meta,
			Label::Create(raw) | Label::Lock(raw) => &mut raw.meta,
			Label::Archive(raw) => &mut raw.meta,
		}
	}

	pub fn details(&self) -> Option<&ChoiceDetails> {
		match self {
			Label::TransferOut { details, .. } | Label::TransferIn { details, .. } => {
				Some(details)
			}
			Label::MergeSplit(details)
			| Label::Burn(details)
			| Label::Mint(details)
			| Label::Unlock(details)
			| Label::ExpireDust(details) => Some(details),
			Label::Create(_) | Label::Lock(_) | Label::Archive(_) => None,
		}
	}
}

/// Normalized lifecycle state of a transfer instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionStatusTag {
	Pending,
	Completed,
	Rejected,
	Withdrawn,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStatus {
	pub tag: InstructionStatusTag,
	pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstructionStatus {
	/// Raw status carried by the ledger's instruction view, if any.
	pub before: Option<Value>,
	pub current: Option<CurrentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInstructionView {
	pub original_instruction_cid: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transfer: Option<Value>,
	pub status: InstructionStatus,
	pub meta: Option<Value>,
	/// Shared by every hop of one multi-step transfer.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub multi_step_correlation_id: Option<String>,
}

/// Transfer instruction interface view as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInstructionView {
	#[serde(default)]
	pub original_instruction_cid: Option<String>,
	pub transfer: Value,
	#[serde(default)]
	pub status: Value,
	#[serde(default)]
	pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStandardEvent {
	pub label: Label,
	pub locked_holdings_change: HoldingsChange,
	pub locked_holdings_change_summaries: Vec<HoldingsChangeSummary>,
	pub locked_holdings_change_summary: HoldingsChangeSummary,
	pub unlocked_holdings_change: HoldingsChange,
	pub unlocked_holdings_change_summaries: Vec<HoldingsChangeSummary>,
	pub unlocked_holdings_change_summary: HoldingsChangeSummary,
	pub transfer_instruction: Option<TransferInstructionView>,
}

impl TokenStandardEvent {
	pub fn has_holdings_change(&self) -> bool {
		!self.locked_holdings_change.is_empty() || !self.unlocked_holdings_change.is_empty()
	}
}

/// One ledger transaction, normalized for a single party.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
	pub update_id: String,
	pub offset: Offset,
	pub record_time: String,
	pub synchronizer_id: String,
	pub events: Vec<TokenStandardEvent>,
}

/// A page of normalized history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
	pub transactions: Vec<Transaction>,
	/// Offset to resume reading from; `None` for an empty page.
	pub next_offset: Option<Offset>,
}

/// Errors that abort parsing of one transaction
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("Gateway error: {0}")]
	Gateway(#[from] GatewayError),

	#[error("Archival of {contract_id} has no corresponding create/archive events")]
	MissingContractEvents { contract_id: String },

	#[error("Unknown transfer instruction result: {0}")]
	UnknownInstructionResult(String),

	#[error("Unknown tx-kind '{kind}' on exercise of {contract_id}")]
	UnknownTxKind { kind: String, contract_id: String },

	#[error("Contract {contract_id} has no {interface_id} view")]
	MissingInterfaceView {
		contract_id: String,
		interface_id: String,
	},

	#[error("Malformed interface view on {contract_id}: {source}")]
	MalformedView {
		contract_id: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("Invalid amount '{amount}': {source}")]
	InvalidAmount {
		amount: String,
		#[source]
		source: rust_decimal::Error,
	},

	#[error("Attempted to sum heterogeneous instruments: {expected} != {found}")]
	HeterogeneousInstruments {
		expected: InstrumentId,
		found: InstrumentId,
	},
}
