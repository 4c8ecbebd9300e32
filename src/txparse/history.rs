use super::parser::TransactionParser;
use super::types::{ParseError, Transaction, TransactionPage};
use crate::ledger::{LedgerGateway, Offset, Update};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::debug;

/// Offset a caller should resume reading from after this page.
///
/// Checkpoints may move past the last transaction; the larger of the two wins.
pub fn next_offset(updates: &[Update]) -> Option<Offset> {
	let last_checkpoint = updates
		.iter()
		.filter_map(|u| match u {
			Update::OffsetCheckpoint { value } => Some(value.offset),
			_ => None,
		})
		.last();
	let max_transaction = updates
		.iter()
		.filter_map(|u| match u {
			Update::Transaction { value } => Some(value.offset),
			_ => None,
		})
		.max();
	last_checkpoint.max(max_transaction)
}

/// Normalize every transaction in a page of updates for one party.
///
/// Checkpoints, reassignments and topology transactions carry no holdings and
/// are skipped. Transactions that yield no events are dropped from the page.
pub async fn parse_updates<G: LedgerGateway + ?Sized>(
	updates: &[Update],
	gateway: &G,
	party_id: &str,
	is_master_user: bool,
) -> Result<TransactionPage, ParseError> {
	let parsed: Vec<Transaction> = try_join_all(updates.iter().filter_map(|u| match u {
		Update::Transaction { value } => Some(async move {
			TransactionParser::new(value, gateway, party_id, is_master_user)
				.parse_transaction()
				.await
		}),
		_ => None,
	}))
	.await?;

	let total = parsed.len();
	let transactions: Vec<Transaction> = parsed
		.into_iter()
		.filter(|tx| !tx.events.is_empty())
		.collect();
	debug!(
		"Parsed {} of {} transactions with events for {}",
		transactions.len(),
		total,
		party_id
	);

	Ok(TransactionPage {
		transactions,
		next_offset: next_offset(updates),
	})
}

/// [`parse_updates`] for several parties over the same page.
pub async fn parse_updates_for_parties<G: LedgerGateway + ?Sized>(
	updates: &[Update],
	gateway: &G,
	party_ids: &[String],
	is_master_user: bool,
) -> Result<BTreeMap<String, TransactionPage>, ParseError> {
	let mut pages = BTreeMap::new();
	for party_id in party_ids {
		let page = parse_updates(updates, gateway, party_id, is_master_user).await?;
		pages.insert(party_id.clone(), page);
	}
	Ok(pages)
}
