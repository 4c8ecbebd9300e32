//! Exact-decimal arithmetic over holding creates and archives.

use super::meta::{BURNED_META_KEY, meta_value};
use super::types::{Holding, HoldingsChange, HoldingsChangeSummary, InstrumentId, Metadata, ParseError};
use crate::utils::{format_amount, parse_amount};
use itertools::Itertools;
use rust_decimal::Decimal;

pub(crate) fn decimal(amount: &str) -> Result<Decimal, ParseError> {
    parse_amount(amount).map_err(|source| ParseError::InvalidAmount {
        amount: amount.to_string(),
        source,
    })
}

/// Sum the amounts of the holdings matching `filter`.
///
/// All matching holdings must share one instrument; mixing instruments is a
/// caller bug and reported as `HeterogeneousInstruments`.
pub fn sum<F>(holdings: &[Holding], filter: F) -> Result<Decimal, ParseError>
where
    F: Fn(&Holding) -> bool,
{
    let mut selected = holdings.iter().filter(|h| filter(*h));
    let Some(first) = selected.next() else {
        return Ok(Decimal::ZERO);
    };

    let mut total = decimal(&first.amount)?;
    for holding in selected {
        if holding.instrument_id != first.instrument_id {
            return Err(ParseError::HeterogeneousInstruments {
                expected: first.instrument_id.clone(),
                found: holding.instrument_id.clone(),
            });
        }
        total += decimal(&holding.amount)?;
    }
    Ok(total)
}

/// Net change: created amounts minus archived amounts, over holdings matching `filter`.
pub fn sum_holdings_change<F>(change: &HoldingsChange, filter: F) -> Result<Decimal, ParseError>
where
    F: Fn(&Holding) -> bool,
{
    Ok(sum(&change.creates, &filter)? - sum(&change.archives, &filter)?)
}

/// Split a change by instrument, in order of first appearance (creates before archives).
pub fn group_by_instrument(change: &HoldingsChange) -> Vec<(InstrumentId, HoldingsChange)> {
    change
        .creates
        .iter()
        .chain(change.archives.iter())
        .map(|h| &h.instrument_id)
        .unique()
        .map(|instrument| {
            let part = change.filtered(|h| &h.instrument_id == instrument);
            (instrument.clone(), part)
        })
        .collect()
}

/// Summarize one instrument's change. `amountChange` only counts holdings owned by `party_id`.
pub fn summarize(
    instrument_id: &InstrumentId,
    change: &HoldingsChange,
    party_id: &str,
) -> Result<HoldingsChangeSummary, ParseError> {
    let amount_change = sum_holdings_change(change, |h| h.owner == party_id)?;
    let output_amount = sum(&change.creates, |_| true)?;
    let input_amount = sum(&change.archives, |_| true)?;

    Ok(HoldingsChangeSummary {
        instrument_id: instrument_id.clone(),
        amount_change: format_amount(amount_change),
        num_inputs: change.archives.len(),
        input_amount: format_amount(input_amount),
        num_outputs: change.creates.len(),
        output_amount: format_amount(output_amount),
    })
}

pub fn compute_summaries(
    change: &HoldingsChange,
    party_id: &str,
) -> Result<Vec<HoldingsChangeSummary>, ParseError> {
    group_by_instrument(change)
        .iter()
        .map(|(instrument, part)| summarize(instrument, part, party_id))
        .collect()
}

/// Burn and mint amounts of an exercise, as rendered decimal strings.
///
/// The burn comes from metadata. The mint is the party's net change plus the
/// burn, less the net change of every other party.
pub fn compute_amount_changes(
    children: &HoldingsChange,
    meta: &Metadata,
    party_id: &str,
) -> Result<(String, String), ParseError> {
    let burn_amount = match meta_value(BURNED_META_KEY, meta) {
        Some(burned) => decimal(burned)?,
        None => Decimal::ZERO,
    };
    let party_change = sum_holdings_change(children, |h| h.owner == party_id)?;
    let others_change = sum_holdings_change(children, |h| h.owner != party_id)?;
    let mint_amount = party_change + burn_amount - others_change;

    Ok((format_amount(burn_amount), format_amount(mint_amount)))
}
