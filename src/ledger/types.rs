//! Types for JSON Ledger API integration: event trees, update streams and filters

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A totally ordered position in the ledger's event log.
pub type Offset = u64;

/// Position of a node inside one transaction's flattened event tree.
pub type NodeId = i64;

/// Interface view attached to a created event when the filter asked for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceView {
    pub interface_id: String,
    /// The view value, absent when the view could not be computed.
    #[serde(default)]
    pub view_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_status: Option<Value>,
}

/// A contract creation as reported by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEvent {
    #[serde(default)]
    pub offset: Offset,
    pub node_id: NodeId,
    pub contract_id: String,
    pub template_id: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub create_argument: Option<Value>,
    #[serde(default)]
    pub interface_views: Vec<InterfaceView>,
    #[serde(default)]
    pub witness_parties: Vec<String>,
    #[serde(default)]
    pub signatories: Vec<String>,
    #[serde(default)]
    pub observers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A contract archival as reported by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedEvent {
    #[serde(default)]
    pub offset: Offset,
    pub node_id: NodeId,
    pub contract_id: String,
    pub template_id: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub witness_parties: Vec<String>,
    #[serde(default)]
    pub implemented_interfaces: Vec<String>,
    /// Only populated when the archive was derived from an `Archive` exercise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acting_parties: Vec<String>,
}

/// A choice exercise; its subtree spans `node_id..=last_descendant_node_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExercisedEvent {
    #[serde(default)]
    pub offset: Offset,
    pub node_id: NodeId,
    pub contract_id: String,
    pub template_id: String,
    #[serde(default)]
    pub interface_id: Option<String>,
    pub choice: String,
    #[serde(default)]
    pub choice_argument: Value,
    #[serde(default)]
    pub acting_parties: Vec<String>,
    #[serde(default)]
    pub consuming: bool,
    #[serde(default)]
    pub witness_parties: Vec<String>,
    pub last_descendant_node_id: NodeId,
    #[serde(default)]
    pub exercise_result: Value,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub implemented_interfaces: Vec<String>,
}

impl ExercisedEvent {
    /// Name of the choice that the ledger uses to report a plain archival in
    /// ledger-effects shaped transactions.
    pub const ARCHIVE_CHOICE: &'static str = "Archive";

    /// View an `Archive` exercise as the archival it stands for.
    pub fn to_archived_event(&self) -> ArchivedEvent {
        ArchivedEvent {
            offset: self.offset,
            node_id: self.node_id,
            contract_id: self.contract_id.clone(),
            template_id: self.template_id.clone(),
            package_name: self.package_name.clone(),
            witness_parties: self.witness_parties.clone(),
            implemented_interfaces: self.implemented_interfaces.clone(),
            acting_parties: self.acting_parties.clone(),
        }
    }
}

/// Raw event node as it appears in a transaction's event list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    CreatedEvent(CreatedEvent),
    ArchivedEvent(ArchivedEvent),
    ExercisedEvent(ExercisedEvent),
}

impl Event {
    pub fn node_id(&self) -> NodeId {
        match self {
            Event::CreatedEvent(e) => e.node_id,
            Event::ArchivedEvent(e) => e.node_id,
            Event::ExercisedEvent(e) => e.node_id,
        }
    }
}

/// A committed transaction as delivered by the update stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsTransaction {
    pub update_id: String,
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub effective_at: Option<String>,
    pub offset: Offset,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub synchronizer_id: String,
    #[serde(default)]
    pub record_time: String,
}

/// Marks that the stream has advanced to `offset` without further transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OffsetCheckpoint {
    pub offset: Offset,
    #[serde(default)]
    pub synchronizer_times: Vec<Value>,
}

/// Update-stream records. Only `Transaction` and `OffsetCheckpoint` carry
/// information the reconciliation layer consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Update {
    Transaction { value: JsTransaction },
    OffsetCheckpoint { value: OffsetCheckpoint },
    Reassignment { value: Value },
    TopologyTransaction { value: Value },
}

/// Envelope of one element returned by the updates endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub update: Update,
}

/// A contract active at some offset, as seen by one observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContract {
    pub created_event: CreatedEvent,
    #[serde(default)]
    pub synchronizer_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub reassignment_counter: u64,
}

impl ActiveContract {
    pub fn contract_id(&self) -> &str {
        &self.created_event.contract_id
    }
}

/// One element of an active-contracts read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContractsResponse {
    #[serde(default)]
    pub workflow_id: String,
    pub contract_entry: ContractEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsActiveContract {
    pub created_event: CreatedEvent,
    #[serde(default)]
    pub synchronizer_id: String,
    #[serde(default)]
    pub reassignment_counter: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContractEntry {
    JsActiveContract(JsActiveContract),
    JsEmpty(Value),
    JsIncompleteAssigned(Value),
    JsIncompleteUnassigned(Value),
}

impl ActiveContractsResponse {
    /// Only fully assigned contracts count as active; incomplete reassignments are skipped.
    pub fn into_active_contract(self) -> Option<ActiveContract> {
        match self.contract_entry {
            ContractEntry::JsActiveContract(entry) => Some(ActiveContract {
                created_event: entry.created_event,
                synchronizer_id: entry.synchronizer_id,
                workflow_id: self.workflow_id,
                reassignment_counter: entry.reassignment_counter,
            }),
            _ => None,
        }
    }
}

/// Result of a point lookup by contract id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvents {
    #[serde(default)]
    pub created: Option<CreatedWithSynchronizer>,
    #[serde(default)]
    pub archived: Option<ArchivedWithSynchronizer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWithSynchronizer {
    pub created_event: CreatedEvent,
    #[serde(default)]
    pub synchronizer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedWithSynchronizer {
    pub archived_event: ArchivedEvent,
    #[serde(default)]
    pub synchronizer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFilterValue {
    pub template_id: String,
    pub include_created_event_blob: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceFilterValue {
    pub interface_id: String,
    pub include_interface_view: bool,
    pub include_created_event_blob: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdentifierFilter {
    TemplateFilter { value: TemplateFilterValue },
    InterfaceFilter { value: InterfaceFilterValue },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeFilter {
    pub identifier_filter: IdentifierFilter,
}

/// Per-party filter. An empty `cumulative` list selects every template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cumulative: Vec<CumulativeFilter>,
}

impl Filters {
    pub fn template(template_id: &str) -> Self {
        Self {
            cumulative: vec![CumulativeFilter {
                identifier_filter: IdentifierFilter::TemplateFilter {
                    value: TemplateFilterValue {
                        template_id: template_id.to_string(),
                        include_created_event_blob: false,
                    },
                },
            }],
        }
    }

    pub fn interfaces<S: AsRef<str>>(interface_ids: &[S]) -> Self {
        Self {
            cumulative: interface_ids
                .iter()
                .map(|id| CumulativeFilter {
                    identifier_filter: IdentifierFilter::InterfaceFilter {
                        value: InterfaceFilterValue {
                            interface_id: id.as_ref().to_string(),
                            include_interface_view: true,
                            include_created_event_blob: false,
                        },
                    },
                })
                .collect(),
        }
    }
}

/// Which events, for which parties, a read should return.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventFormat {
    pub filters_by_party: BTreeMap<String, Filters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters_for_any_party: Option<Filters>,
    pub verbose: bool,
}

impl EventFormat {
    /// Interface-scoped format used for point lookups: any party for
    /// privileged readers, otherwise only `party`.
    pub fn for_interfaces<S: AsRef<str>>(
        interface_ids: &[S],
        party: &str,
        any_party: bool,
        verbose: bool,
    ) -> Self {
        let filters = Filters::interfaces(interface_ids);
        if any_party {
            Self {
                filters_by_party: BTreeMap::new(),
                filters_for_any_party: Some(filters),
                verbose,
            }
        } else {
            Self {
                filters_by_party: BTreeMap::from([(party.to_string(), filters)]),
                filters_for_any_party: None,
                verbose,
            }
        }
    }
}

/// Error types for ledger gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Ledger API error {code} (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        detail: Option<Value>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Streaming reads are not supported by this gateway")]
    StreamingUnsupported,

    #[error("Invalid endpoint: {0}")]
    Url(String),
}

impl GatewayError {
    /// Ledger error code reported for point lookups on contracts the
    /// requesting parties cannot see.
    pub const CONTRACT_EVENTS_NOT_FOUND: &'static str = "CONTRACT_EVENTS_NOT_FOUND";

    pub fn is_contract_not_found(&self) -> bool {
        matches!(self, GatewayError::Api { code, .. } if code == Self::CONTRACT_EVENTS_NOT_FOUND)
    }
}
