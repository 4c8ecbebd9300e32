//! Transaction normalizer.
//!
//! Walks the flattened event tree of one ledger transaction and rebuilds the
//! token-standard meaning of each recognized choice (transfers, instruction
//! resolutions, burns and mints, merges and splits) as a [`TokenStandardEvent`]
//! carrying the observing party's holdings change.
//!
//! Nodes are visited in list order. Each exercise spans the node range
//! `node_id..=last_descendant_node_id`; once an exercise resolves to an event,
//! every node inside its range is considered consumed and skipped. Exercises
//! that are not recognized leave a frame on an explicit stack so that their
//! recognized descendants know their parent choice.

use super::holdings::{compute_amount_changes, compute_summaries, decimal};
use super::meta::*;
use super::types::*;
use crate::utils::format_amount;
use crate::ledger::{
	ArchivedEvent, CreatedEvent, Event, EventFormat, ExercisedEvent, JsTransaction, LedgerGateway,
	NodeId,
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::borrow::Cow;
use std::str::FromStr;
use tracing::{debug, warn};

/// Parent choice reported for nodes outside any unrecognized exercise.
pub const ROOT_PARENT_CHOICE: &str = "none (root node)";

const RESULT_COMPLETED: &str = "TransferInstructionResult_Completed";
const RESULT_FAILED: &str = "TransferInstructionResult_Failed";
const RESULT_PENDING: &str = "TransferInstructionResult_Pending";

/// Choices resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownChoice {
	Transfer,
	InstructionAccept,
	InstructionReject,
	InstructionWithdraw,
	InstructionUpdate,
	BurnMint,
}

impl KnownChoice {
	fn from_name(choice: &str) -> Option<Self> {
		match choice {
			"TransferRule_Transfer" | "TransferFactory_Transfer" => Some(Self::Transfer),
			"TransferInstruction_Accept" => Some(Self::InstructionAccept),
			"TransferInstruction_Reject" => Some(Self::InstructionReject),
			"TransferInstruction_Withdraw" => Some(Self::InstructionWithdraw),
			"TransferInstruction_Update" => Some(Self::InstructionUpdate),
			"BurnMintFactory_BurnMint" => Some(Self::BurnMint),
			_ => None,
		}
	}
}

/// Values of the `tx-kind` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
	Transfer,
	MergeSplit,
	Burn,
	Mint,
	Unlock,
	ExpireDust,
}

impl FromStr for TxKind {
	type Err = String;

	fn from_str(kind: &str) -> Result<Self, Self::Err> {
		match kind {
			"transfer" => Ok(Self::Transfer),
			"merge-split" => Ok(Self::MergeSplit),
			"burn" => Ok(Self::Burn),
			"mint" => Ok(Self::Mint),
			"unlock" => Ok(Self::Unlock),
			"expire-dust" => Ok(Self::ExpireDust),
			other => Err(other.to_string()),
		}
	}
}

/// Node classification; an `Archive` exercise counts as an archival.
enum Node<'e> {
	Created(&'e CreatedEvent),
	Archived(Cow<'e, ArchivedEvent>),
	Exercised(&'e ExercisedEvent),
}

impl<'e> Node<'e> {
	fn classify(event: &'e Event) -> Self {
		match event {
			Event::CreatedEvent(created) => Node::Created(created),
			Event::ArchivedEvent(archived) => Node::Archived(Cow::Borrowed(archived)),
			Event::ExercisedEvent(exercised)
				if exercised.choice == ExercisedEvent::ARCHIVE_CHOICE =>
			{
				Node::Archived(Cow::Owned(exercised.to_archived_event()))
			}
			Event::ExercisedEvent(exercised) => Node::Exercised(exercised),
		}
	}
}

struct Frame {
	parent_choice_name: String,
	until_node_id: NodeId,
}

enum Parsed {
	/// A resolved event; nodes up to `continue_after` are subsumed by it.
	Leaf {
		event: TokenStandardEvent,
		continue_after: NodeId,
	},
	/// An unrecognized exercise whose descendants are parsed on their own.
	Container {
		parent_choice_name: String,
		last_descendant_node_id: NodeId,
	},
}

/// Result of a recognized choice before it is narrowed to the party's holdings.
struct ParsedExercise {
	label: Label,
	children: HoldingsChange,
	transfer_instruction: Option<TransferInstructionView>,
}

fn result_tag(exercise: &ExercisedEvent) -> Option<&str> {
	exercise
		.exercise_result
		.get("output")
		.and_then(|o| o.get("tag"))
		.and_then(Value::as_str)
}

/// The terminal tag in the result wins; otherwise the choice decides.
fn current_status(choice: &str, result_tag: Option<&str>) -> InstructionStatusTag {
	match (result_tag, choice) {
		(Some(RESULT_FAILED), _) => InstructionStatusTag::Failed,
		(Some(RESULT_COMPLETED), _) => InstructionStatusTag::Completed,
		(_, "TransferInstruction_Reject") => InstructionStatusTag::Rejected,
		(_, "TransferInstruction_Withdraw") => InstructionStatusTag::Withdrawn,
		_ => InstructionStatusTag::Pending,
	}
}

/// Contract id of the instruction left pending by a transfer, if any.
fn pending_instruction_cid(exercise: &ExercisedEvent) -> Option<String> {
	let output = exercise.exercise_result.get("output")?;
	if output.get("tag").and_then(Value::as_str) != Some(RESULT_PENDING) {
		return None;
	}
	output
		.get("value")
		.and_then(|v| v.get("transferInstructionCid"))
		.and_then(Value::as_str)
		.map(str::to_string)
}

fn event_from_changes(
	label: Label,
	locked: HoldingsChange,
	unlocked: HoldingsChange,
	party_id: &str,
	transfer_instruction: Option<TransferInstructionView>,
) -> Result<TokenStandardEvent, ParseError> {
	let locked_summaries = compute_summaries(&locked, party_id)?;
	let unlocked_summaries = compute_summaries(&unlocked, party_id)?;
	Ok(TokenStandardEvent {
		label,
		locked_holdings_change_summary: locked_summaries
			.first()
			.cloned()
			.unwrap_or_else(HoldingsChangeSummary::empty),
		locked_holdings_change: locked,
		locked_holdings_change_summaries: locked_summaries,
		unlocked_holdings_change_summary: unlocked_summaries
			.first()
			.cloned()
			.unwrap_or_else(HoldingsChangeSummary::empty),
		unlocked_holdings_change: unlocked,
		unlocked_holdings_change_summaries: unlocked_summaries,
		transfer_instruction,
	})
}

/// Normalizes one transaction for one party.
pub struct TransactionParser<'a, G: LedgerGateway + ?Sized> {
	transaction: &'a JsTransaction,
	gateway: &'a G,
	party_id: &'a str,
	is_master_user: bool,
}

impl<'a, G: LedgerGateway + ?Sized> TransactionParser<'a, G> {
	/// # Arguments
	/// * `transaction` - The raw ledger transaction.
	/// * `gateway` - Used for point lookups of archived contracts.
	/// * `party_id` - The observing party.
	/// * `is_master_user` - Whether lookups may read as any party.
	pub fn new(
		transaction: &'a JsTransaction,
		gateway: &'a G,
		party_id: &'a str,
		is_master_user: bool,
	) -> Self {
		Self {
			transaction,
			gateway,
			party_id,
			is_master_user,
		}
	}

	/// Parse the transaction into normalized events, in the order their
	/// choices appear in the transaction.
	///
	/// # Errors
	/// Aborts on gateway errors, missing create/archive pairs for visible
	/// archivals, unknown instruction results and unknown `tx-kind` values.
	pub async fn parse_transaction(&self) -> Result<Transaction, ParseError> {
		let tx = self.transaction;
		let events = self.parse_events().await?;
		debug!(
			"Parsed transaction {} at offset {} into {} events",
			tx.update_id,
			tx.offset,
			events.len()
		);
		Ok(Transaction {
			update_id: tx.update_id.clone(),
			offset: tx.offset,
			record_time: tx.record_time.clone(),
			synchronizer_id: tx.synchronizer_id.clone(),
			events,
		})
	}

	async fn parse_events(&self) -> Result<Vec<TokenStandardEvent>, ParseError> {
		let mut call_stack: Vec<Frame> = Vec::new();
		let mut continue_after: NodeId = -1;
		let mut result = Vec::new();

		for event in &self.transaction.events {
			let node_id = event.node_id();
			call_stack.retain(|frame| frame.until_node_id >= node_id);
			if node_id <= continue_after {
				continue;
			}
			let parent_choice = call_stack
				.last()
				.map(|frame| frame.parent_choice_name.as_str())
				.unwrap_or(ROOT_PARENT_CHOICE);

			let parsed = match Node::classify(event) {
				Node::Created(created) => self.parse_raw_create(created, parent_choice)?,
				Node::Archived(archived) => self.parse_raw_archive(&archived, parent_choice).await?,
				Node::Exercised(exercised) => Some(self.parse_exercise(exercised).await?),
			};

			match parsed {
				Some(Parsed::Leaf {
					mut event,
					continue_after: next,
				}) => {
					// Choices without any effect on holdings are not reported.
					if event.has_holdings_change() {
						strip_parsed_meta_keys(event.label.meta_mut());
						result.push(event);
					}
					continue_after = next;
				}
				Some(Parsed::Container {
					parent_choice_name,
					last_descendant_node_id,
				}) => call_stack.push(Frame {
					parent_choice_name,
					until_node_id: last_descendant_node_id,
				}),
				None => {}
			}
		}
		Ok(result)
	}

	/// The observing party's holding behind a raw create or archive.
	fn own_holding(
		&self,
		created: &CreatedEvent,
		contract_id: &str,
	) -> Result<Option<(Value, Holding)>, ParseError> {
		// Instruction views never carry holdings of their own.
		let Some(KnownView::Holding(view)) = known_interface_view(created)? else {
			return Ok(None);
		};
		if view.owner != self.party_id {
			return Ok(None);
		}
		let payload = interface_view(created)
			.and_then(|v| v.view_value.clone())
			.unwrap_or(Value::Null);
		Ok(Some((payload, Holding::from_view(contract_id, view))))
	}

	fn split_by_lock(holding: Holding, archived: bool) -> (HoldingsChange, HoldingsChange) {
		let mut locked = HoldingsChange::default();
		let mut unlocked = HoldingsChange::default();
		let target = if holding.is_locked() {
			&mut locked
		} else {
			&mut unlocked
		};
		if archived {
			target.archives.push(holding);
		} else {
			target.creates.push(holding);
		}
		(locked, unlocked)
	}

	fn parse_raw_create(
		&self,
		create: &CreatedEvent,
		parent_choice: &str,
	) -> Result<Option<Parsed>, ParseError> {
		let Some((payload, holding)) = self.own_holding(create, &create.contract_id)? else {
			return Ok(None);
		};
		let is_lock = holding.is_locked() && decimal(&holding.amount)? > Decimal::ZERO;
		let (locked, unlocked) = Self::split_by_lock(holding, false);

		let raw = RawCreate {
			parent_choice: parent_choice.to_string(),
			contract_id: create.contract_id.clone(),
			offset: create.offset,
			template_id: create.template_id.clone(),
			package_name: create.package_name.clone(),
			payload,
			meta: Metadata::default(),
		};
		let label = if is_lock { Label::Lock(raw) } else { Label::Create(raw) };

		Ok(Some(Parsed::Leaf {
			event: event_from_changes(label, locked, unlocked, self.party_id, None)?,
			continue_after: create.node_id,
		}))
	}

	async fn parse_raw_archive(
		&self,
		archive: &ArchivedEvent,
		parent_choice: &str,
	) -> Result<Option<Parsed>, ParseError> {
		let Some(created) = self
			.events_for_archive(&archive.contract_id, &archive.witness_parties)
			.await?
		else {
			return Ok(None);
		};
		let Some((payload, holding)) = self.own_holding(&created, &archive.contract_id)? else {
			return Ok(None);
		};
		let (locked, unlocked) = Self::split_by_lock(holding, true);

		let label = Label::Archive(RawArchive {
			parent_choice: parent_choice.to_string(),
			contract_id: archive.contract_id.clone(),
			offset: archive.offset,
			template_id: archive.template_id.clone(),
			package_name: archive.package_name.clone(),
			acting_parties: archive.acting_parties.clone(),
			payload,
			meta: Metadata::default(),
		});

		Ok(Some(Parsed::Leaf {
			event: event_from_changes(label, locked, unlocked, self.party_id, None)?,
			continue_after: archive.node_id,
		}))
	}

	async fn parse_exercise(&self, exercise: &ExercisedEvent) -> Result<Parsed, ParseError> {
		let choice = TokenStandardChoice {
			name: exercise.choice.clone(),
			choice_argument: exercise.choice_argument.clone(),
			exercise_result: exercise.exercise_result.clone(),
		};

		let parsed = match KnownChoice::from_name(&exercise.choice) {
			Some(KnownChoice::Transfer) => self.build_transfer(exercise, Some(choice), None).await?,
			Some(
				KnownChoice::InstructionAccept
				| KnownChoice::InstructionReject
				| KnownChoice::InstructionWithdraw
				| KnownChoice::InstructionUpdate,
			) => self.build_from_instruction_exercise(exercise, choice).await?,
			Some(KnownChoice::BurnMint) => Some(self.build_merge_split(exercise, Some(choice)).await?),
			None => {
				let meta = merge_metas(exercise);
				match meta_value(TX_KIND_META_KEY, &meta) {
					Some(kind) => {
						let kind = TxKind::from_str(kind).map_err(|kind| ParseError::UnknownTxKind {
							kind,
							contract_id: exercise.contract_id.clone(),
						})?;
						self.parse_via_tx_kind(exercise, kind).await?
					}
					None => None,
				}
			}
		};

		let Some(parsed) = parsed else {
			return Ok(Parsed::Container {
				parent_choice_name: exercise.choice.clone(),
				last_descendant_node_id: exercise.last_descendant_node_id,
			});
		};

		// Only the observing party's holdings are reported.
		let party = self.party_id;
		let locked = parsed
			.children
			.filtered(|h| h.is_locked() && h.owner == party);
		let unlocked = parsed
			.children
			.filtered(|h| !h.is_locked() && h.owner == party);

		Ok(Parsed::Leaf {
			event: event_from_changes(
				parsed.label,
				locked,
				unlocked,
				party,
				parsed.transfer_instruction,
			)?,
			continue_after: exercise.last_descendant_node_id,
		})
	}

	async fn parse_via_tx_kind(
		&self,
		exercise: &ExercisedEvent,
		kind: TxKind,
	) -> Result<Option<ParsedExercise>, ParseError> {
		match kind {
			TxKind::Transfer => self.build_transfer(exercise, None, None).await,
			TxKind::MergeSplit | TxKind::Burn | TxKind::Mint => {
				Ok(Some(self.build_merge_split(exercise, None).await?))
			}
			TxKind::Unlock => Ok(Some(self.build_basic(exercise, TxKind::Unlock).await?)),
			TxKind::ExpireDust => Ok(Some(self.build_basic(exercise, TxKind::ExpireDust).await?)),
		}
	}

	async fn build_transfer(
		&self,
		exercise: &ExercisedEvent,
		choice: Option<TokenStandardChoice>,
		instruction: Option<TransferInstructionView>,
	) -> Result<Option<ParsedExercise>, ParseError> {
		let meta = merge_metas(exercise);
		let reason = meta_value(REASON_META_KEY, &meta).map(str::to_string);
		let argument_transfer = exercise.choice_argument.get("transfer");

		let sender = instruction
			.as_ref()
			.and_then(|i| i.transfer.as_ref())
			.and_then(|t| t.get("sender"))
			.and_then(Value::as_str)
			.filter(|s| !s.is_empty())
			.or_else(|| meta_value(SENDER_META_KEY, &meta))
			.or_else(|| {
				argument_transfer
					.and_then(|t| t.get("sender"))
					.and_then(Value::as_str)
					.filter(|s| !s.is_empty())
			})
			.map(str::to_string);
		let Some(sender) = sender else {
			warn!(
				"Malformed transfer on {} has no sender, parsing its children instead",
				exercise.contract_id
			);
			return Ok(None);
		};

		let current_tag = current_status(&exercise.choice, result_tag(exercise));
		let children = self.get_children(exercise).await?;

		let mut receiver_amounts: Vec<(String, Decimal)> = Vec::new();
		for holding in children.creates.iter().filter(|h| h.owner != sender) {
			let amount = decimal(&holding.amount)?;
			match receiver_amounts.iter_mut().find(|(r, _)| *r == holding.owner) {
				Some((_, total)) => *total += amount,
				None => receiver_amounts.push((holding.owner.clone(), amount)),
			}
		}
		let (burn_amount, mint_amount) = compute_amount_changes(&children, &meta, self.party_id)?;

		let label = if receiver_amounts.is_empty() {
			Label::MergeSplit(ChoiceDetails {
				burn_amount,
				mint_amount,
				reason,
				token_standard_choice: choice,
				meta,
			})
		} else if sender == self.party_id {
			Label::TransferOut {
				details: ChoiceDetails {
					burn_amount,
					mint_amount,
					reason,
					token_standard_choice: choice,
					meta,
				},
				receiver_amounts: receiver_amounts
					.into_iter()
					.map(|(receiver, amount)| ReceiverAmount {
						receiver,
						amount: format_amount(amount),
					})
					.collect(),
			}
		} else {
			// The receiving side never burns or mints.
			Label::TransferIn {
				details: ChoiceDetails {
					burn_amount: "0".to_string(),
					mint_amount: "0".to_string(),
					reason,
					token_standard_choice: choice,
					meta,
				},
				sender,
			}
		};

		let transfer_instruction = match instruction {
			Some(mut instruction) => {
				instruction.status.current.get_or_insert_with(|| CurrentStatus {
					tag: current_tag,
					value: json!({}),
				});
				instruction
			}
			None => TransferInstructionView {
				original_instruction_cid: None,
				transfer: argument_transfer.cloned(),
				status: InstructionStatus {
					before: None,
					current: Some(CurrentStatus {
						tag: current_tag,
						value: json!({}),
					}),
				},
				meta: None,
				multi_step_correlation_id: pending_instruction_cid(exercise),
			},
		};

		Ok(Some(ParsedExercise {
			label,
			children,
			transfer_instruction: Some(transfer_instruction),
		}))
	}

	async fn build_merge_split(
		&self,
		exercise: &ExercisedEvent,
		choice: Option<TokenStandardChoice>,
	) -> Result<ParsedExercise, ParseError> {
		let meta = merge_metas(exercise);
		let kind = meta_value(TX_KIND_META_KEY, &meta).and_then(|k| TxKind::from_str(k).ok());
		let reason = meta_value(REASON_META_KEY, &meta).map(str::to_string);
		let children = self.get_children(exercise).await?;
		let (burn_amount, mint_amount) = compute_amount_changes(&children, &meta, self.party_id)?;

		let details = ChoiceDetails {
			burn_amount,
			mint_amount,
			reason,
			token_standard_choice: choice,
			meta,
		};
		let label = match kind {
			Some(TxKind::Burn) => Label::Burn(details),
			Some(TxKind::Mint) => Label::Mint(details),
			_ => Label::MergeSplit(details),
		};

		Ok(ParsedExercise {
			label,
			children,
			transfer_instruction: None,
		})
	}

	/// Resolve an Accept/Reject/Withdraw/Update on a pending instruction.
	async fn build_from_instruction_exercise(
		&self,
		exercise: &ExercisedEvent,
		choice: TokenStandardChoice,
	) -> Result<Option<ParsedExercise>, ParseError> {
		let Some(created) = self
			.events_for_archive(&exercise.contract_id, &exercise.witness_parties)
			.await?
		else {
			// Observers of the choice that are not stakeholders of the instruction.
			return Ok(None);
		};
		let view: LedgerInstructionView =
			ensure_interface_view(&created, TRANSFER_INSTRUCTION_INTERFACE_ID)?;

		let correlation_id = view
			.original_instruction_cid
			.clone()
			.unwrap_or_else(|| exercise.contract_id.clone());
		let tag = result_tag(exercise);

		let instruction = TransferInstructionView {
			original_instruction_cid: view.original_instruction_cid,
			transfer: Some(view.transfer),
			status: InstructionStatus {
				before: Some(view.status),
				current: Some(CurrentStatus {
					tag: current_status(&exercise.choice, tag),
					value: json!({}),
				}),
			},
			meta: view.meta,
			multi_step_correlation_id: Some(correlation_id),
		};

		let parsed = match tag {
			Some(RESULT_FAILED) | Some(RESULT_PENDING) => {
				Some(self.build_merge_split(exercise, Some(choice)).await?)
			}
			Some(RESULT_COMPLETED) => {
				self.build_transfer(exercise, Some(choice), Some(instruction.clone()))
					.await?
			}
			other => {
				return Err(ParseError::UnknownInstructionResult(
					other.unwrap_or("<missing>").to_string(),
				));
			}
		};

		Ok(parsed.map(|mut parsed| {
			parsed.transfer_instruction = Some(instruction);
			parsed
		}))
	}

	async fn build_basic(
		&self,
		exercise: &ExercisedEvent,
		kind: TxKind,
	) -> Result<ParsedExercise, ParseError> {
		let children = self.get_children(exercise).await?;
		let meta = merge_metas(exercise);
		let (burn_amount, mint_amount) = compute_amount_changes(&children, &meta, self.party_id)?;
		let reason = meta_value(REASON_META_KEY, &meta).map(str::to_string);

		let details = ChoiceDetails {
			burn_amount,
			mint_amount,
			reason,
			token_standard_choice: None,
			meta,
		};
		let label = match kind {
			TxKind::ExpireDust => Label::ExpireDust(details),
			_ => Label::Unlock(details),
		};

		Ok(ParsedExercise {
			label,
			children,
			transfer_instruction: None,
		})
	}

	/// Holding creates and archives inside an exercise's node range, with
	/// contracts both created and archived in that range removed.
	async fn get_children(&self, exercise: &ExercisedEvent) -> Result<HoldingsChange, ParseError> {
		let mut change = HoldingsChange::default();

		if exercise.consuming && has_interface(HOLDING_INTERFACE_ID, &exercise.implemented_interfaces) {
			if let Some(holding) = self
				.archived_holding(&exercise.contract_id, &exercise.witness_parties)
				.await?
			{
				change.archives.push(holding);
			}
		}

		let descendants = self.transaction.events.iter().filter(|e| {
			e.node_id() > exercise.node_id && e.node_id() <= exercise.last_descendant_node_id
		});
		for event in descendants {
			match Node::classify(event) {
				Node::Created(created) => {
					if let Some(KnownView::Holding(view)) = known_interface_view(created)? {
						change
							.creates
							.push(Holding::from_view(&created.contract_id, view));
					}
				}
				Node::Archived(archived) => {
					if has_interface(HOLDING_INTERFACE_ID, &archived.implemented_interfaces) {
						if let Some(holding) = self
							.archived_holding(&archived.contract_id, &archived.witness_parties)
							.await?
						{
							change.archives.push(holding);
						}
					}
				}
				Node::Exercised(child) => {
					if child.consuming
						&& has_interface(HOLDING_INTERFACE_ID, &child.implemented_interfaces)
					{
						if let Some(holding) = self
							.archived_holding(&child.contract_id, &child.witness_parties)
							.await?
						{
							change.archives.push(holding);
						}
					}
				}
			}
		}

		let HoldingsChange { creates, archives } = change;
		let transient: Vec<String> = creates
			.iter()
			.filter(|c| archives.iter().any(|a| a.contract_id == c.contract_id))
			.map(|c| c.contract_id.clone())
			.collect();
		Ok(HoldingsChange {
			creates: creates
				.into_iter()
				.filter(|c| !transient.contains(&c.contract_id))
				.collect(),
			archives: archives
				.into_iter()
				.filter(|a| !transient.contains(&a.contract_id))
				.collect(),
		})
	}

	async fn archived_holding(
		&self,
		contract_id: &str,
		witness_parties: &[String],
	) -> Result<Option<Holding>, ParseError> {
		let Some(created) = self.events_for_archive(contract_id, witness_parties).await? else {
			return Ok(None);
		};
		let view: HoldingView = ensure_interface_view(&created, HOLDING_INTERFACE_ID)?;
		Ok(Some(Holding::from_view(contract_id, view)))
	}

	/// Created event behind an archival the party witnessed.
	///
	/// Returns `None` when the party is not a witness or the ledger does not
	/// expose the contract to it (observed, but not a stakeholder).
	async fn events_for_archive(
		&self,
		contract_id: &str,
		witness_parties: &[String],
	) -> Result<Option<CreatedEvent>, ParseError> {
		if !witness_parties.iter().any(|p| p == self.party_id) {
			debug!(
				"Party {} did not witness archival of {}, skipping",
				self.party_id, contract_id
			);
			return Ok(None);
		}

		let format = EventFormat::for_interfaces(
			&[HOLDING_INTERFACE_ID, TRANSFER_INSTRUCTION_INTERFACE_ID],
			self.party_id,
			self.is_master_user,
			true,
		);
		let Some(events) = self.gateway.events_by_contract_id(contract_id, &format).await? else {
			debug!(
				"Contract {} not visible to {}, dropping archival",
				contract_id, self.party_id
			);
			return Ok(None);
		};

		match (events.created, events.archived) {
			(Some(created), Some(_)) => Ok(Some(created.created_event)),
			_ => Err(ParseError::MissingContractEvents {
				contract_id: contract_id.to_string(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::mock::{MockGateway, transaction};
	use crate::ledger::{ArchivedWithSynchronizer, ContractEvents, CreatedWithSynchronizer};
	use serde_json::json;

	const ALICE: &str = "alice::1220";
	const BOB: &str = "bob::1220";

	fn holding_view(owner: &str, amount: &str, locked: bool) -> Value {
		let lock = if locked {
			json!({"holders": ["dso::1220"]})
		} else {
			Value::Null
		};
		json!({
			"owner": owner,
			"instrumentId": {"admin": "dso::1220", "id": "Amulet"},
			"amount": amount,
			"lock": lock,
			"meta": {"values": {}}
		})
	}

	fn created_with_view(node_id: NodeId, cid: &str, interface_id: &str, view: Value) -> CreatedEvent {
		serde_json::from_value(json!({
			"offset": 10,
			"nodeId": node_id,
			"contractId": cid,
			"templateId": "#splice-amulet:Splice.Amulet:Amulet",
			"packageName": "splice-amulet",
			"interfaceViews": [{"interfaceId": interface_id, "viewValue": view}],
			"witnessParties": [ALICE]
		}))
		.unwrap()
	}

	fn holding_created(node_id: NodeId, cid: &str, owner: &str, amount: &str, locked: bool) -> Event {
		Event::CreatedEvent(created_with_view(
			node_id,
			cid,
			HOLDING_INTERFACE_ID,
			holding_view(owner, amount, locked),
		))
	}

	fn holding_archived(node_id: NodeId, cid: &str) -> Event {
		Event::ArchivedEvent(
			serde_json::from_value(json!({
				"offset": 10,
				"nodeId": node_id,
				"contractId": cid,
				"templateId": "#splice-amulet:Splice.Amulet:Amulet",
				"packageName": "splice-amulet",
				"witnessParties": [ALICE],
				"implementedInterfaces": [HOLDING_INTERFACE_ID]
			}))
			.unwrap(),
		)
	}

	fn exercise(
		node_id: NodeId,
		last_descendant: NodeId,
		cid: &str,
		choice: &str,
		argument: Value,
		result: Value,
	) -> Event {
		Event::ExercisedEvent(
			serde_json::from_value(json!({
				"offset": 10,
				"nodeId": node_id,
				"contractId": cid,
				"templateId": "#splice-amulet:Splice.AmuletRules:AmuletRules",
				"choice": choice,
				"choiceArgument": argument,
				"exerciseResult": result,
				"consuming": false,
				"witnessParties": [ALICE],
				"lastDescendantNodeId": last_descendant
			}))
			.unwrap(),
		)
	}

	fn lookup_of(created: CreatedEvent) -> ContractEvents {
		let archived = crate::ledger::mock::archived_event(&created.contract_id, 10);
		ContractEvents {
			created: Some(CreatedWithSynchronizer {
				created_event: created,
				synchronizer_id: "sync::1".to_string(),
			}),
			archived: Some(ArchivedWithSynchronizer {
				archived_event: archived,
				synchronizer_id: "sync::1".to_string(),
			}),
		}
	}

	fn holding_lookup(cid: &str, owner: &str, amount: &str) -> ContractEvents {
		lookup_of(created_with_view(
			0,
			cid,
			HOLDING_INTERFACE_ID,
			holding_view(owner, amount, false),
		))
	}

	async fn parse(events: Vec<Event>, gateway: &MockGateway) -> Result<Transaction, ParseError> {
		let tx = transaction(10, events);
		TransactionParser::new(&tx, gateway, ALICE, false)
			.parse_transaction()
			.await
	}

	#[tokio::test]
	async fn empty_transaction_has_no_events_and_no_lookups() {
		let gateway = MockGateway::new();
		let tx = parse(Vec::new(), &gateway).await.unwrap();

		assert_eq!(tx.update_id, "update-10");
		assert_eq!(tx.offset, 10);
		assert_eq!(tx.synchronizer_id, "sync::1");
		assert!(tx.events.is_empty());
		assert_eq!(gateway.lookup_count(), 0);
	}

	#[tokio::test]
	async fn owned_holding_create_becomes_create_event() {
		let gateway = MockGateway::new();
		let tx = parse(
			vec![holding_created(0, "h1", ALICE, "200.0000000000", false)],
			&gateway,
		)
		.await
		.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		assert_eq!(event.label.type_name(), "Create");
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "200");
		assert_eq!(event.unlocked_holdings_change_summary.num_outputs, 1);
		assert_eq!(event.locked_holdings_change_summary, HoldingsChangeSummary::empty());
		match &event.label {
			Label::Create(raw) => {
				assert_eq!(raw.parent_choice, ROOT_PARENT_CHOICE);
				assert_eq!(raw.contract_id, "h1");
				assert!(raw.meta.values.is_empty());
			}
			other => panic!("unexpected label {other:?}"),
		}
	}

	#[tokio::test]
	async fn locked_holding_create_becomes_lock_event() {
		let gateway = MockGateway::new();
		let tx = parse(vec![holding_created(0, "h1", ALICE, "5", true)], &gateway)
			.await
			.unwrap();

		assert_eq!(tx.events[0].label.type_name(), "Lock");
		assert_eq!(tx.events[0].locked_holdings_change_summary.amount_change, "5");
		assert!(tx.events[0].unlocked_holdings_change.is_empty());
	}

	#[tokio::test]
	async fn holdings_of_other_parties_are_not_reported() {
		let gateway = MockGateway::new();
		let tx = parse(vec![holding_created(0, "h1", BOB, "5", false)], &gateway)
			.await
			.unwrap();
		assert!(tx.events.is_empty());
	}

	#[tokio::test]
	async fn archive_not_found_is_dropped_after_lookup() {
		let gateway = MockGateway::new();
		let tx = parse(vec![holding_archived(0, "gone")], &gateway).await.unwrap();

		assert!(tx.events.is_empty());
		assert_eq!(gateway.lookup_count(), 1);
	}

	#[tokio::test]
	async fn archive_of_own_holding_is_a_debit() {
		let gateway = MockGateway::new().with_lookup("h1", holding_lookup("h1", ALICE, "12.5"));
		let tx = parse(vec![holding_archived(0, "h1")], &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		assert_eq!(event.label.type_name(), "Archive");
		assert_eq!(event.unlocked_holdings_change.archives.len(), 1);
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "-12.5");
		assert_eq!(event.unlocked_holdings_change_summary.num_inputs, 1);
	}

	#[tokio::test]
	async fn archive_without_create_pair_is_fatal() {
		let mut events = holding_lookup("h1", ALICE, "1");
		events.archived = None;
		let gateway = MockGateway::new().with_lookup("h1", events);

		let err = parse(vec![holding_archived(0, "h1")], &gateway)
			.await
			.unwrap_err();
		assert!(matches!(err, ParseError::MissingContractEvents { ref contract_id } if contract_id == "h1"));
	}

	fn transfer_argument(sender: &str) -> Value {
		json!({"transfer": {"sender": sender, "receiver": BOB, "amount": "30.0"}})
	}

	#[tokio::test]
	async fn completed_transfer_out_reports_receivers_and_drops_transients() {
		let gateway = MockGateway::new()
			.with_lookup("h0", holding_lookup("h0", ALICE, "100"))
			.with_lookup("t1", holding_lookup("t1", ALICE, "100"));
		let events = vec![
			exercise(
				0,
				5,
				"factory",
				"TransferFactory_Transfer",
				transfer_argument(ALICE),
				json!({"output": {"tag": RESULT_COMPLETED, "value": {}}}),
			),
			holding_archived(1, "h0"),
			holding_created(2, "t1", ALICE, "100", false),
			holding_archived(3, "t1"),
			holding_created(4, "h2", BOB, "30.0", false),
			holding_created(5, "h3", ALICE, "70.0", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		match &event.label {
			Label::TransferOut {
				details,
				receiver_amounts,
			} => {
				assert_eq!(receiver_amounts.len(), 1);
				assert_eq!(receiver_amounts[0].receiver, BOB);
				assert_eq!(receiver_amounts[0].amount, "30");
				assert_eq!(details.burn_amount, "0");
				// alice -30, less bob's +30
				assert_eq!(details.mint_amount, "-60");
				assert_eq!(
					details.token_standard_choice.as_ref().map(|c| c.name.as_str()),
					Some("TransferFactory_Transfer")
				);
			}
			other => panic!("unexpected label {other:?}"),
		}

		let unlocked = &event.unlocked_holdings_change;
		let created: Vec<&str> = unlocked.creates.iter().map(|h| h.contract_id.as_str()).collect();
		let archived: Vec<&str> = unlocked.archives.iter().map(|h| h.contract_id.as_str()).collect();
		assert_eq!(created, ["h3"]);
		assert_eq!(archived, ["h0"]);
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "-30");

		let instruction = event.transfer_instruction.as_ref().unwrap();
		assert_eq!(
			instruction.status.current.as_ref().map(|c| c.tag),
			Some(InstructionStatusTag::Completed)
		);
		assert!(instruction.multi_step_correlation_id.is_none());
	}

	#[tokio::test]
	async fn pending_transfer_carries_new_instruction_as_correlation_id() {
		let gateway = MockGateway::new().with_lookup("h0", holding_lookup("h0", ALICE, "50"));
		let events = vec![
			exercise(
				0,
				3,
				"factory",
				"TransferFactory_Transfer",
				transfer_argument(ALICE),
				json!({"output": {
					"tag": RESULT_PENDING,
					"value": {"transferInstructionCid": "ti9"}
				}}),
			),
			holding_archived(1, "h0"),
			holding_created(2, "l1", ALICE, "20", true),
			holding_created(3, "h1", ALICE, "30", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		let event = &tx.events[0];
		// Funds only moved between the sender's own holdings so far.
		assert_eq!(event.label.type_name(), "MergeSplit");
		assert_eq!(event.locked_holdings_change.creates.len(), 1);
		assert_eq!(event.locked_holdings_change_summary.amount_change, "20");
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "-20");

		let instruction = event.transfer_instruction.as_ref().unwrap();
		assert_eq!(instruction.multi_step_correlation_id.as_deref(), Some("ti9"));
		assert_eq!(
			instruction.status.current.as_ref().map(|c| c.tag),
			Some(InstructionStatusTag::Pending)
		);
	}

	fn instruction_lookup(cid: &str, original: Option<&str>) -> ContractEvents {
		lookup_of(created_with_view(
			0,
			cid,
			TRANSFER_INSTRUCTION_INTERFACE_ID,
			json!({
				"originalInstructionCid": original,
				"transfer": {"sender": BOB, "receiver": ALICE, "amount": "10"},
				"status": {"tag": "TransferPendingReceiverAcceptance", "value": {}},
				"meta": {"values": {}}
			}),
		))
	}

	#[tokio::test]
	async fn accepted_instruction_is_transfer_in_correlated_to_instruction() {
		let gateway = MockGateway::new()
			.with_lookup("ti1", instruction_lookup("ti1", None))
			.with_lookup("lb", holding_lookup("lb", BOB, "10"));
		let events = vec![
			exercise(
				0,
				2,
				"ti1",
				"TransferInstruction_Accept",
				json!({"extraArgs": {"meta": {"values": {REASON_META_KEY: "invoice 7"}}}}),
				json!({"output": {"tag": RESULT_COMPLETED, "value": {}}}),
			),
			holding_archived(1, "lb"),
			holding_created(2, "h9", ALICE, "10", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		match &event.label {
			Label::TransferIn { details, sender } => {
				assert_eq!(sender, BOB);
				assert_eq!(details.reason.as_deref(), Some("invoice 7"));
				assert_eq!(details.mint_amount, "0");
				assert!(details.meta.values.is_empty());
			}
			other => panic!("unexpected label {other:?}"),
		}
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "10");
		// Bob's archived holding is not reported to Alice.
		assert!(event.unlocked_holdings_change.archives.is_empty());

		let instruction = event.transfer_instruction.as_ref().unwrap();
		assert_eq!(instruction.multi_step_correlation_id.as_deref(), Some("ti1"));
		assert_eq!(
			instruction.status.before,
			Some(json!({"tag": "TransferPendingReceiverAcceptance", "value": {}}))
		);
		assert_eq!(
			instruction.status.current.as_ref().map(|c| c.tag),
			Some(InstructionStatusTag::Completed)
		);
	}

	#[tokio::test]
	async fn later_hops_inherit_original_instruction_id() {
		let gateway = MockGateway::new()
			.with_lookup("ti2", instruction_lookup("ti2", Some("ti1")))
			.with_lookup("l1", holding_lookup("l1", ALICE, "10"));
		let events = vec![
			exercise(
				0,
				2,
				"ti2",
				"TransferInstruction_Withdraw",
				json!({}),
				json!({"output": {"tag": RESULT_FAILED, "value": {}}}),
			),
			holding_archived(1, "l1"),
			holding_created(2, "h1", ALICE, "10", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		let instruction = tx.events[0].transfer_instruction.as_ref().unwrap();
		assert_eq!(instruction.multi_step_correlation_id.as_deref(), Some("ti1"));
		assert_eq!(instruction.original_instruction_cid.as_deref(), Some("ti1"));
		assert_eq!(
			instruction.status.current.as_ref().map(|c| c.tag),
			Some(InstructionStatusTag::Failed)
		);
	}

	#[tokio::test]
	async fn unknown_instruction_result_is_fatal() {
		let gateway = MockGateway::new().with_lookup("ti1", instruction_lookup("ti1", None));
		let events = vec![exercise(
			0,
			0,
			"ti1",
			"TransferInstruction_Reject",
			json!({}),
			json!({"output": {"tag": "TransferInstructionResult_Exploded"}}),
		)];
		let err = parse(events, &gateway).await.unwrap_err();
		assert!(matches!(err, ParseError::UnknownInstructionResult(ref tag) if tag == "TransferInstructionResult_Exploded"));
	}

	#[tokio::test]
	async fn tx_kind_burn_derives_mint_from_burn_and_changes() {
		let gateway = MockGateway::new().with_lookup("h0", holding_lookup("h0", ALICE, "10"));
		let events = vec![
			exercise(
				0,
				2,
				"app",
				"App_Redeem",
				json!({"meta": {"values": {
					TX_KIND_META_KEY: "burn",
					BURNED_META_KEY: "4",
					"app/ref": "r-1"
				}}}),
				json!({}),
			),
			holding_archived(1, "h0"),
			holding_created(2, "h1", ALICE, "6", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		let event = &tx.events[0];
		let details = event.label.details().unwrap();
		assert_eq!(event.label.type_name(), "Burn");
		assert_eq!(details.burn_amount, "4");
		assert_eq!(details.mint_amount, "0");
		assert!(details.token_standard_choice.is_none());
		let keys: Vec<&str> = details.meta.values.keys().map(String::as_str).collect();
		assert_eq!(keys, ["app/ref"]);
	}

	#[tokio::test]
	async fn completed_transfer_between_own_holdings_is_merge_split() {
		let gateway = MockGateway::new().with_lookup("h0", holding_lookup("h0", ALICE, "50"));
		let events = vec![
			exercise(
				0,
				3,
				"factory",
				"TransferFactory_Transfer",
				transfer_argument(ALICE),
				json!({"output": {"tag": RESULT_COMPLETED, "value": {}}}),
			),
			holding_archived(1, "h0"),
			holding_created(2, "h1", ALICE, "20", false),
			holding_created(3, "h2", ALICE, "30", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		assert_eq!(event.label.type_name(), "MergeSplit");
		assert_eq!(event.unlocked_holdings_change.creates.len(), 2);
		assert_eq!(event.unlocked_holdings_change.archives.len(), 1);
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "0");
		assert_eq!(
			event
				.transfer_instruction
				.as_ref()
				.and_then(|i| i.status.current.as_ref())
				.map(|c| c.tag),
			Some(InstructionStatusTag::Completed)
		);
	}

	#[tokio::test]
	async fn tx_kind_unlock_moves_locked_funds_to_unlocked() {
		let locked = lookup_of(created_with_view(
			0,
			"l1",
			HOLDING_INTERFACE_ID,
			holding_view(ALICE, "10", true),
		));
		let gateway = MockGateway::new().with_lookup("l1", locked);
		let events = vec![
			exercise(
				0,
				2,
				"l1",
				"LockedAmulet_Unlock",
				json!({"meta": {"values": {TX_KIND_META_KEY: "unlock"}}}),
				json!({}),
			),
			holding_archived(1, "l1"),
			holding_created(2, "h1", ALICE, "10", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		assert_eq!(event.label.type_name(), "Unlock");
		assert_eq!(event.locked_holdings_change.archives.len(), 1);
		assert_eq!(event.locked_holdings_change_summary.amount_change, "-10");
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "10");
		let details = event.label.details().unwrap();
		assert_eq!((details.burn_amount.as_str(), details.mint_amount.as_str()), ("0", "0"));
		assert!(details.meta.values.is_empty());
	}

	#[tokio::test]
	async fn tx_kind_expire_dust_reports_the_expired_holding() {
		let gateway = MockGateway::new().with_lookup("d1", holding_lookup("d1", ALICE, "0.0001"));
		let events = vec![
			exercise(
				0,
				1,
				"rules",
				"AmuletRules_Sweep",
				json!({"meta": {"values": {TX_KIND_META_KEY: "expire-dust"}}}),
				json!({}),
			),
			holding_archived(1, "d1"),
		];
		let tx = parse(events, &gateway).await.unwrap();

		assert_eq!(tx.events.len(), 1);
		let event = &tx.events[0];
		assert_eq!(event.label.type_name(), "ExpireDust");
		assert_eq!(event.unlocked_holdings_change_summary.amount_change, "-0.0001");
		assert_eq!(event.unlocked_holdings_change_summary.num_inputs, 1);
		assert!(event.locked_holdings_change.is_empty());
	}

	#[tokio::test]
	async fn unknown_tx_kind_is_fatal() {
		let gateway = MockGateway::new();
		let events = vec![exercise(
			0,
			0,
			"app",
			"App_Do",
			json!({"meta": {"values": {TX_KIND_META_KEY: "teleport"}}}),
			json!({}),
		)];
		let err = parse(events, &gateway).await.unwrap_err();
		assert!(matches!(err, ParseError::UnknownTxKind { ref kind, .. } if kind == "teleport"));
	}

	#[tokio::test]
	async fn unrecognized_exercise_attributes_descendants_to_itself() {
		let gateway = MockGateway::new();
		let events = vec![
			exercise(0, 1, "app", "App_Settle", json!({}), json!({})),
			holding_created(1, "h1", ALICE, "3", false),
			holding_created(2, "h2", ALICE, "4", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		let parents: Vec<&str> = tx
			.events
			.iter()
			.map(|e| match &e.label {
				Label::Create(raw) => raw.parent_choice.as_str(),
				other => panic!("unexpected label {other:?}"),
			})
			.collect();
		assert_eq!(parents, ["App_Settle", ROOT_PARENT_CHOICE]);
	}

	#[tokio::test]
	async fn recognized_child_of_unrecognized_parent_is_reported_in_order() {
		let gateway = MockGateway::new().with_lookup("h0", holding_lookup("h0", ALICE, "8"));
		let events = vec![
			exercise(0, 4, "app", "App_Batch", json!({}), json!({})),
			exercise(
				1,
				3,
				"rules",
				"TransferRule_Transfer",
				transfer_argument(ALICE),
				json!({"output": {"tag": RESULT_COMPLETED}}),
			),
			holding_archived(2, "h0"),
			holding_created(3, "h1", BOB, "8", false),
			holding_created(4, "h2", ALICE, "1", false),
		];
		let tx = parse(events, &gateway).await.unwrap();

		let labels: Vec<&str> = tx.events.iter().map(|e| e.label.type_name()).collect();
		assert_eq!(labels, ["TransferOut", "Create"]);
		match &tx.events[1].label {
			Label::Create(raw) => assert_eq!(raw.parent_choice, "App_Batch"),
			other => panic!("unexpected label {other:?}"),
		}
	}

	#[tokio::test]
	async fn archive_not_witnessed_skips_lookup() {
		let gateway = MockGateway::new();
		let mut archived = crate::ledger::mock::archived_event("h1", 10);
		archived.witness_parties = vec![BOB.to_string()];
		let tx = parse(vec![Event::ArchivedEvent(archived)], &gateway)
			.await
			.unwrap();

		assert!(tx.events.is_empty());
		assert_eq!(gateway.lookup_count(), 0);
	}
}
