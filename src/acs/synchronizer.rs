//! Active contract set synchronization for one observer.
//!
//! A synchronizer answers "which contracts are active at offset O" by keeping a
//! baseline snapshot and folding the creates and archives observed on the
//! update stream since. The baseline is read once (streaming first, one-shot
//! query as fallback), pending deltas are compacted into a newer baseline when
//! they pile up, and later requests only read the updates they have not seen.

use super::types::{AcUpdateEvent, AcsConfig, AcsError, AcsKey, AcsSnapshotState, DeltaChange};
use crate::ledger::{ActiveContract, Event, EventFormat, ExercisedEvent, LedgerGateway, Offset, Update};
use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Resets after a request older than the baseline before giving up.
const MAX_STALE_RETRIES: usize = 2;

/// Creates and archives in a page of updates, and the offset the page reaches.
///
/// Transactions at or before `from_offset` were already seen and are skipped.
/// The offset is the largest of the last transaction and the last checkpoint.
pub fn extract_events(from_offset: Offset, updates: &[Update]) -> (Vec<AcUpdateEvent>, Offset) {
	let mut events = Vec::new();
	let mut reached = from_offset;

	for update in updates {
		match update {
			Update::Transaction { value: tx } => {
				if tx.offset <= from_offset {
					continue;
				}
				let delta = |change: DeltaChange| AcUpdateEvent {
					offset: tx.offset,
					change,
					workflow_id: tx.workflow_id.clone().unwrap_or_default(),
					synchronizer_id: tx.synchronizer_id.clone(),
				};
				for event in &tx.events {
					match event {
						Event::CreatedEvent(created) => {
							events.push(delta(DeltaChange::Created(created.clone())))
						}
						Event::ArchivedEvent(archived) => events.push(delta(DeltaChange::Archived {
							contract_id: archived.contract_id.clone(),
						})),
						Event::ExercisedEvent(exercised)
							if exercised.choice == ExercisedEvent::ARCHIVE_CHOICE =>
						{
							events.push(delta(DeltaChange::Archived {
								contract_id: exercised.contract_id.clone(),
							}))
						}
						Event::ExercisedEvent(_) => {}
					}
				}
				reached = reached.max(tx.offset);
			}
			Update::OffsetCheckpoint { value } => reached = reached.max(value.offset),
			Update::Reassignment { .. } | Update::TopologyTransaction { .. } => {
				debug!("Skipping update without active contract changes");
			}
		}
	}
	(events, reached)
}

/// Keeps one key's active contract set current.
///
/// `update` calls are serialized; the state is published as a whole after
/// every step so concurrent readers of [`AcsSynchronizer::snapshot`] never see
/// a partially applied page.
pub struct AcsSynchronizer {
	key: AcsKey,
	config: AcsConfig,
	update_lock: tokio::sync::Mutex<()>,
	state: Mutex<Option<Arc<AcsSnapshotState>>>,
}

impl AcsSynchronizer {
	pub fn new(key: AcsKey, config: AcsConfig) -> Self {
		Self {
			key,
			config,
			update_lock: tokio::sync::Mutex::new(()),
			state: Mutex::new(None),
		}
	}

	/// Resume from a previously saved state.
	pub fn with_state(key: AcsKey, config: AcsConfig, state: AcsSnapshotState) -> Self {
		let synchronizer = Self::new(key, config);
		synchronizer.publish(state);
		synchronizer
	}

	pub fn key(&self) -> &AcsKey {
		&self.key
	}

	/// The last published state, if any.
	pub fn snapshot(&self) -> Option<Arc<AcsSnapshotState>> {
		self.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	fn publish(&self, state: AcsSnapshotState) -> Arc<AcsSnapshotState> {
		let state = Arc::new(state);
		*self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
		state
	}

	fn reset(&self) {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
	}

	/// Active contracts at `offset`, once every update through `offset` is folded in.
	///
	/// # Errors
	/// Gateway errors are returned as they are; this layer does not retry reads.
	pub async fn update<G: LedgerGateway + ?Sized>(
		&self,
		offset: Offset,
		gateway: &G,
	) -> Result<Vec<ActiveContract>, AcsError> {
		let _guard = self.update_lock.lock().await;
		let format = self.key.event_format();

		for attempt in 1..=MAX_STALE_RETRIES + 1 {
			match self.try_update(offset, gateway, &format).await {
				Err(AcsError::OffsetBeforeBaseline { requested, baseline }) => {
					info!(
						"Offset {} is before baseline {} for {:?}, resetting (attempt {})",
						requested, baseline, self.key, attempt
					);
					self.reset();
				}
				result => return result,
			}
		}
		Err(AcsError::RetriesExhausted {
			offset,
			attempts: MAX_STALE_RETRIES + 1,
		})
	}

	async fn try_update<G: LedgerGateway + ?Sized>(
		&self,
		offset: Offset,
		gateway: &G,
		format: &EventFormat,
	) -> Result<Vec<ActiveContract>, AcsError> {
		let Some(current) = self.snapshot() else {
			let contracts = self.read_snapshot(offset, gateway, format).await?;
			let state = self.publish(AcsSnapshotState::from_baseline(offset, contracts));
			return Ok(state.contracts_at(offset));
		};
		if offset < current.baseline_offset {
			return Err(AcsError::OffsetBeforeBaseline {
				requested: offset,
				baseline: current.baseline_offset,
			});
		}

		let mut state = if current.pending_deltas.len() >= self.config.max_events_before_prune {
			// Never past `offset`, or the fold below would answer from a newer baseline.
			let target = current.baseline_offset.max(
				current
					.last_seen_offset
					.saturating_sub(self.config.safe_offset_delta_for_prune)
					.min(offset),
			);
			let compacted = current.compacted(target);
			debug!(
				"Compacted {:?} to baseline {} keeping {} of {} deltas",
				self.key,
				compacted.baseline_offset,
				compacted.pending_deltas.len(),
				current.pending_deltas.len()
			);
			self.publish(compacted)
		} else {
			current
		};

		let limit = self.config.max_updates_to_fetch;
		while state.last_seen_offset < offset {
			let page = gateway
				.updates(state.last_seen_offset, offset, format, limit)
				.await?;
			let (events, reached) = extract_events(state.last_seen_offset, &page);
			let full_page = page.len() >= limit;
			debug!(
				"Read {} updates ({} deltas) for {:?} after offset {}",
				page.len(),
				events.len(),
				self.key,
				state.last_seen_offset
			);

			if full_page && reached <= state.last_seen_offset {
				warn!(
					"Full page after offset {} did not advance for {:?}, reading on next update",
					state.last_seen_offset, self.key
				);
				break;
			}

			let mut next = (*state).clone();
			next.pending_deltas.extend(events);
			// A short page holds everything through `offset`.
			next.last_seen_offset = if full_page { reached } else { offset };
			state = self.publish(next);

			if !full_page {
				break;
			}
		}

		Ok(state.contracts_at(offset))
	}

	async fn read_snapshot<G: LedgerGateway + ?Sized>(
		&self,
		offset: Offset,
		gateway: &G,
		format: &EventFormat,
	) -> Result<Vec<ActiveContract>, AcsError> {
		if let Some(switch) = gateway.stream_switch().filter(|s| s.enabled()) {
			match self.stream_snapshot(offset, gateway, format).await {
				Ok(contracts) => {
					switch.report_success();
					info!(
						"Streamed {} active contracts at offset {} for {:?}",
						contracts.len(),
						offset,
						self.key
					);
					return Ok(contracts);
				}
				Err(e) => {
					warn!("Streaming snapshot read failed, falling back to query: {}", e);
					switch.report_error(&e);
				}
			}
		}

		let contracts = gateway.active_contracts(offset, format).await?;
		info!(
			"Read {} active contracts at offset {} for {:?}",
			contracts.len(),
			offset,
			self.key
		);
		Ok(contracts)
	}

	/// Collect a streaming snapshot. The stream is dropped, closing the
	/// connection, on every return path.
	async fn stream_snapshot<G: LedgerGateway + ?Sized>(
		&self,
		offset: Offset,
		gateway: &G,
		format: &EventFormat,
	) -> Result<Vec<ActiveContract>, AcsError> {
		let mut stream = gateway.active_contracts_stream(offset, format).await?;
		let deadline = self.config.first_element_timeout;

		let mut contracts = Vec::new();
		match tokio::time::timeout(deadline, stream.next()).await {
			Err(_) => return Err(AcsError::FirstElementTimeout(deadline)),
			Ok(None) => return Ok(contracts),
			Ok(Some(first)) => contracts.push(first?),
		}
		while let Some(contract) = stream.next().await {
			contracts.push(contract?);
		}
		Ok(contracts)
	}
}
