//! Token-standard metadata keys and interface view helpers.

use super::types::{HoldingView, LedgerInstructionView, Metadata, ParseError};
use crate::ledger::{CreatedEvent, ExercisedEvent, InterfaceView};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub const HOLDING_INTERFACE_ID: &str =
	"#splice-api-token-holding-v1:Splice.Api.Token.HoldingV1:Holding";
pub const TRANSFER_INSTRUCTION_INTERFACE_ID: &str = "#splice-api-token-transfer-instruction-v1:Splice.Api.Token.TransferInstructionV1:TransferInstruction";

pub const TX_KIND_META_KEY: &str = "splice.lfdecentralizedtrust.org/tx-kind";
pub const SENDER_META_KEY: &str = "splice.lfdecentralizedtrust.org/sender";
pub const REASON_META_KEY: &str = "splice.lfdecentralizedtrust.org/reason";
pub const BURNED_META_KEY: &str = "splice.lfdecentralizedtrust.org/burned";

/// Keys whose content is reflected in the typed label and are dropped from its meta.
pub const PARSED_META_KEYS: [&str; 4] = [
	TX_KIND_META_KEY,
	SENDER_META_KEY,
	REASON_META_KEY,
	BURNED_META_KEY,
];

/// Split `#package:Module:Entity` into its three parts. The leading `#` is optional.
pub fn split_interface_id(interface_id: &str) -> Option<(&str, &str, &str)> {
	let id = interface_id.strip_prefix('#').unwrap_or(interface_id);
	let mut parts = id.split(':');
	let package = parts.next().filter(|p| !p.is_empty())?;
	let module = parts.next().filter(|p| !p.is_empty())?;
	let entity = parts.next().filter(|p| !p.is_empty())?;
	if parts.next().is_some() {
		return None;
	}
	Some((package, module, entity))
}

/// Two interface ids match when module and entity agree; the package is ignored.
pub fn match_interface_ids(a: &str, b: &str) -> bool {
	match (split_interface_id(a), split_interface_id(b)) {
		(Some((_, a_module, a_entity)), Some((_, b_module, b_entity))) => {
			a_module == b_module && a_entity == b_entity
		}
		_ => false,
	}
}

pub fn has_interface(interface_id: &str, implemented_interfaces: &[String]) -> bool {
	implemented_interfaces
		.iter()
		.any(|id| match_interface_ids(id, interface_id))
}

fn meta_values(meta: Option<&Value>) -> impl Iterator<Item = (&String, &str)> {
	meta.and_then(|m| m.get("values"))
		.and_then(Value::as_object)
		.into_iter()
		.flatten()
		.filter_map(|(k, v)| v.as_str().map(|v| (k, v)))
}

/// Merge the metadata of an exercise; later sources win:
/// `transfer.meta`, `extraArgs.meta`, `meta`, then the result's `meta`.
pub fn merge_metas(exercise: &ExercisedEvent) -> Metadata {
	let argument = &exercise.choice_argument;
	let sources = [
		argument.get("transfer").and_then(|t| t.get("meta")),
		argument.get("extraArgs").and_then(|e| e.get("meta")),
		argument.get("meta"),
		exercise.exercise_result.get("meta"),
	];

	let mut merged = Metadata::default();
	for source in sources {
		for (key, value) in meta_values(source) {
			merged.values.insert(key.clone(), value.to_string());
		}
	}
	merged
}

/// Value under `key`, treating empty strings as absent.
pub fn meta_value<'a>(key: &str, meta: &'a Metadata) -> Option<&'a str> {
	meta.values
		.get(key)
		.map(String::as_str)
		.filter(|v| !v.is_empty())
}

pub fn strip_parsed_meta_keys(meta: &mut Metadata) {
	meta.values
		.retain(|key, _| !PARSED_META_KEYS.contains(&key.as_str()));
}

/// The first interface view of a created event, if the read asked for views.
pub fn interface_view(created: &CreatedEvent) -> Option<&InterfaceView> {
	created.interface_views.first()
}

/// Views of the interfaces the parser understands.
#[derive(Debug, Clone, PartialEq)]
pub enum KnownView {
	Holding(HoldingView),
	TransferInstruction(LedgerInstructionView),
}

fn decode_view<T: DeserializeOwned>(created: &CreatedEvent, view: &InterfaceView) -> Result<T, ParseError> {
	serde_json::from_value(view.view_value.clone().unwrap_or(Value::Null)).map_err(|source| {
		ParseError::MalformedView {
			contract_id: created.contract_id.clone(),
			source,
		}
	})
}

pub fn known_interface_view(created: &CreatedEvent) -> Result<Option<KnownView>, ParseError> {
	let Some(view) = interface_view(created) else {
		return Ok(None);
	};
	if match_interface_ids(HOLDING_INTERFACE_ID, &view.interface_id) {
		Ok(Some(KnownView::Holding(decode_view(created, view)?)))
	} else if match_interface_ids(TRANSFER_INSTRUCTION_INTERFACE_ID, &view.interface_id) {
		Ok(Some(KnownView::TransferInstruction(decode_view(created, view)?)))
	} else {
		Ok(None)
	}
}

/// Decode the view for `interface_id`, which the read filter guarantees is present.
pub fn ensure_interface_view<T: DeserializeOwned>(
	created: &CreatedEvent,
	interface_id: &str,
) -> Result<T, ParseError> {
	match interface_view(created) {
		Some(view) if match_interface_ids(interface_id, &view.interface_id) => {
			decode_view(created, view)
		}
		_ => Err(ParseError::MissingInterfaceView {
			contract_id: created.contract_id.clone(),
			interface_id: interface_id.to_string(),
		}),
	}
}
