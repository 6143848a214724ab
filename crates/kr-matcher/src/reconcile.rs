use std::collections::BTreeMap;

use kr_core::{DiscrepancySeverity, Game, SocialPostGameData};
use serde::{Deserialize, Serialize};

const CASH_TOLERANCE: f64 = 1.0;
const MAJOR_CASH_DIFFERENCE: f64 = 100.0;

/// Differences between what a post reports as paid out and what the game records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPreview {
    pub extracted_cash_paid: f64,
    pub game_prizepool_paid: f64,
    pub cash_difference: f64,
    pub extracted_ticket_count: i64,
    pub game_ticket_count: i64,
    pub ticket_count_difference: i64,
    pub extracted_ticket_value: f64,
    pub game_ticket_value: f64,
    pub ticket_value_difference: f64,
    pub has_discrepancy: bool,
    pub discrepancy_severity: Option<DiscrepancySeverity>,
}

/// Only computed when the post carries ticket data and the game keeps
/// accumulator-ticket accounting.
pub fn reconciliation_preview(extraction: &SocialPostGameData, game: &Game) -> Option<ReconciliationPreview> {
    if !extraction.carries_ticket_data() || !game.carries_accumulator_accounting() {
        return None;
    }
    let reconciliation = extraction.reconciliation.clone().unwrap_or_default();

    let extracted_cash_paid = reconciliation.total_cash_paid.unwrap_or(0.0);
    let game_prizepool_paid = game.prizepool_paid.unwrap_or(0.0);
    let cash_difference = extracted_cash_paid - game_prizepool_paid;

    let extracted_ticket_count = reconciliation
        .accumulator_ticket_count
        .or(extraction.total_tickets_extracted)
        .unwrap_or(0);
    let game_ticket_count = game.number_of_accumulator_tickets_paid.unwrap_or(0);
    let ticket_count_difference = extracted_ticket_count - game_ticket_count;

    let extracted_ticket_value = reconciliation.accumulator_ticket_value.unwrap_or(0.0);
    let game_ticket_value = game.accumulator_ticket_value.unwrap_or(0.0);
    let ticket_value_difference = extracted_ticket_value - game_ticket_value;

    let has_discrepancy = cash_difference.abs() > CASH_TOLERANCE || ticket_count_difference != 0;
    let discrepancy_severity = has_discrepancy.then(|| {
        if cash_difference.abs() > MAJOR_CASH_DIFFERENCE {
            DiscrepancySeverity::Major
        } else {
            DiscrepancySeverity::Minor
        }
    });

    Some(ReconciliationPreview {
        extracted_cash_paid,
        game_prizepool_paid,
        cash_difference,
        extracted_ticket_count,
        game_ticket_count,
        ticket_count_difference,
        extracted_ticket_value,
        game_ticket_value,
        ticket_value_difference,
        has_discrepancy,
        discrepancy_severity,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    pub has_ticket_data: bool,
    pub total_tickets_extracted: i64,
    pub total_ticket_value: f64,
    pub ticket_count_by_type: BTreeMap<String, i64>,
    pub has_advertised_tickets: bool,
    pub advertised_ticket_count: Option<i64>,
    pub advertised_ticket_type: Option<String>,
    pub advertised_ticket_value: Option<f64>,
}

pub fn ticket_summary(extraction: &SocialPostGameData) -> TicketSummary {
    TicketSummary {
        has_ticket_data: extraction.carries_ticket_data(),
        total_tickets_extracted: extraction.total_tickets_extracted.unwrap_or(0),
        total_ticket_value: extraction.total_ticket_value.unwrap_or(0.0),
        ticket_count_by_type: extraction.ticket_count_by_type.clone().unwrap_or_default(),
        has_advertised_tickets: extraction.has_advertised_tickets.unwrap_or(false),
        advertised_ticket_count: extraction.advertised_ticket_count,
        advertised_ticket_type: extraction.advertised_ticket_type.clone(),
        advertised_ticket_value: extraction.advertised_ticket_value,
    }
}
