//! Multi-signal scoring of an extraction against a game.
//!
//! Every signal of the catalog is reported on every result, with one of four
//! statuses. Tiered groups (buy-in exact/close/mismatch, date
//! exact/close/mismatch, venue exact/suggested, tournament type
//! match/mismatch, name contains/fuzzy) mark the tiers below a matched one
//! as not applicable.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use kr_core::normalize::{names_contain, normalize_name, shared_significant_words, significant_words};
use kr_core::time::{local_date, local_weekday, parse_local_date};
use kr_core::{ContentType, Game, GameStatus, MatchReason, SocialPostGameData};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Identity,
    Financial,
    Temporal,
    Venue,
    Structure,
    Attributes,
    Content,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 7] = [
        SignalCategory::Identity,
        SignalCategory::Financial,
        SignalCategory::Temporal,
        SignalCategory::Venue,
        SignalCategory::Structure,
        SignalCategory::Attributes,
        SignalCategory::Content,
    ];

    pub fn max_score(self) -> f64 {
        match self {
            SignalCategory::Identity => 115.0,
            SignalCategory::Financial => 48.0,
            SignalCategory::Temporal => 28.0,
            SignalCategory::Venue => 20.0,
            SignalCategory::Structure => 24.0,
            SignalCategory::Attributes => 10.0,
            SignalCategory::Content => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKey {
    TournamentIdMatch,
    RecurringNameMatch,
    RecurringNameFuzzy,
    BuyInExact,
    BuyInClose,
    BuyInMismatch,
    GuaranteeMatch,
    RakeMatch,
    DateExact,
    DateClose,
    DateMismatch,
    DayOfWeekMatch,
    VenueExact,
    VenueSuggested,
    StartingStackMatch,
    BlindLevelMatch,
    TournamentTypeMatch,
    TournamentTypeMismatch,
    EntryCountMatch,
    ResultPostBonus,
    PromoPostBonus,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalDef {
    pub key: SignalKey,
    pub category: SignalCategory,
    /// Contribution when matched; negative for penalties.
    pub weight: f64,
}

const fn def(key: SignalKey, category: SignalCategory, weight: f64) -> SignalDef {
    SignalDef {
        key,
        category,
        weight,
    }
}

pub const CATALOG: [SignalDef; 21] = [
    def(SignalKey::TournamentIdMatch, SignalCategory::Identity, 100.0),
    def(SignalKey::RecurringNameMatch, SignalCategory::Identity, 15.0),
    def(SignalKey::RecurringNameFuzzy, SignalCategory::Identity, 10.0),
    def(SignalKey::BuyInExact, SignalCategory::Financial, 25.0),
    def(SignalKey::BuyInClose, SignalCategory::Financial, 12.0),
    def(SignalKey::BuyInMismatch, SignalCategory::Financial, -10.0),
    def(SignalKey::GuaranteeMatch, SignalCategory::Financial, 15.0),
    def(SignalKey::RakeMatch, SignalCategory::Financial, 8.0),
    def(SignalKey::DateExact, SignalCategory::Temporal, 20.0),
    def(SignalKey::DateClose, SignalCategory::Temporal, 10.0),
    def(SignalKey::DateMismatch, SignalCategory::Temporal, -15.0),
    def(SignalKey::DayOfWeekMatch, SignalCategory::Temporal, 8.0),
    def(SignalKey::VenueExact, SignalCategory::Venue, 20.0),
    def(SignalKey::VenueSuggested, SignalCategory::Venue, 10.0),
    def(SignalKey::StartingStackMatch, SignalCategory::Structure, 8.0),
    def(SignalKey::BlindLevelMatch, SignalCategory::Structure, 6.0),
    def(SignalKey::TournamentTypeMatch, SignalCategory::Structure, 10.0),
    def(SignalKey::TournamentTypeMismatch, SignalCategory::Structure, -8.0),
    def(SignalKey::EntryCountMatch, SignalCategory::Attributes, 10.0),
    def(SignalKey::ResultPostBonus, SignalCategory::Content, 10.0),
    def(SignalKey::PromoPostBonus, SignalCategory::Content, 5.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Matched,
    NotMatched,
    NotApplicable,
    NotEvaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResult {
    pub key: SignalKey,
    pub category: SignalCategory,
    pub status: SignalStatus,
    pub weight: f64,
    pub contribution: f64,
    pub game_value: Option<Value>,
    pub extracted_value: Option<Value>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub score: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub raw_score: f64,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub match_reason: MatchReason,
    pub would_auto_link: bool,
    pub thresholds: Thresholds,
    pub categories: BTreeMap<SignalCategory, CategoryTotal>,
    pub signals: Vec<SignalResult>,
}

impl ScoreResult {
    pub fn status(&self, key: SignalKey) -> SignalStatus {
        self.signals
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.status)
            .unwrap_or(SignalStatus::NotEvaluated)
    }

    pub fn is_matched(&self, key: SignalKey) -> bool {
        self.status(key) == SignalStatus::Matched
    }

    pub fn statuses(&self) -> BTreeMap<SignalKey, SignalStatus> {
        self.signals.iter().map(|s| (s.key, s.status)).collect()
    }

    pub fn above_minimum(&self) -> bool {
        self.confidence >= self.thresholds.minimum
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreOptions {
    pub content_type: Option<ContentType>,
    pub post_date: Option<DateTime<Utc>>,
    pub thresholds: Thresholds,
}

/// Records one status per signal; every signal starts NOT_EVALUATED.
struct SignalSheet {
    results: BTreeMap<SignalKey, SignalResult>,
}

impl SignalSheet {
    fn new() -> Self {
        let results = CATALOG
            .iter()
            .map(|d| {
                (
                    d.key,
                    SignalResult {
                        key: d.key,
                        category: d.category,
                        status: SignalStatus::NotEvaluated,
                        weight: d.weight,
                        contribution: 0.0,
                        game_value: None,
                        extracted_value: None,
                        detail: "value missing on one side".to_string(),
                    },
                )
            })
            .collect();
        Self { results }
    }

    fn record(
        &mut self,
        key: SignalKey,
        status: SignalStatus,
        game_value: Option<Value>,
        extracted_value: Option<Value>,
        detail: impl Into<String>,
    ) {
        if let Some(slot) = self.results.get_mut(&key) {
            slot.contribution = if status == SignalStatus::Matched {
                slot.weight
            } else {
                0.0
            };
            slot.status = status;
            slot.game_value = game_value;
            slot.extracted_value = extracted_value;
            slot.detail = detail.into();
        }
    }

    fn matched(&mut self, key: SignalKey, game: Value, extracted: Value, detail: impl Into<String>) {
        self.record(key, SignalStatus::Matched, Some(game), Some(extracted), detail);
    }

    fn missed(&mut self, key: SignalKey, game: Value, extracted: Value, detail: impl Into<String>) {
        self.record(key, SignalStatus::NotMatched, Some(game), Some(extracted), detail);
    }

    fn not_applicable(&mut self, key: SignalKey, detail: impl Into<String>) {
        self.record(key, SignalStatus::NotApplicable, None, None, detail);
    }

    fn finish(self) -> Vec<SignalResult> {
        self.results.into_values().collect()
    }
}

fn relative_diff(game: f64, extracted: f64) -> f64 {
    let diff = (extracted - game).abs();
    if game.abs() > f64::EPSILON {
        diff / game.abs()
    } else if diff < 0.005 {
        0.0
    } else {
        f64::INFINITY
    }
}

fn score_identity(sheet: &mut SignalSheet, extraction: &SocialPostGameData, game: &Game) {
    if let (Some(g), Some(e)) = (game.tournament_id, extraction.extracted_tournament_id) {
        if g == e {
            sheet.matched(SignalKey::TournamentIdMatch, json!(g), json!(e), "tournament id equal");
        } else {
            sheet.missed(SignalKey::TournamentIdMatch, json!(g), json!(e), "tournament id differs");
        }
    }

    let game_name = game
        .recurring_game_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(&game.name);
    let Some(extracted_name) = extraction.extracted_recurring_game_name.as_deref() else {
        return;
    };
    let g = normalize_name(game_name);
    let e = normalize_name(extracted_name);
    if g.is_empty() || e.is_empty() {
        return;
    }

    if names_contain(&g, &e) {
        sheet.matched(SignalKey::RecurringNameMatch, json!(g), json!(e), "normalized names contain each other");
        sheet.not_applicable(SignalKey::RecurringNameFuzzy, "name contains matched");
        return;
    }
    sheet.missed(SignalKey::RecurringNameMatch, json!(g), json!(e), "names do not contain each other");

    let needed = significant_words(&g).len().min(significant_words(&e).len()).min(2);
    let shared = shared_significant_words(&e, &g);
    if needed > 0 && shared >= needed {
        sheet.matched(
            SignalKey::RecurringNameFuzzy,
            json!(g),
            json!(e),
            format!("{shared} significant words shared"),
        );
    } else {
        sheet.missed(
            SignalKey::RecurringNameFuzzy,
            json!(g),
            json!(e),
            format!("{shared} significant words shared, {needed} needed"),
        );
    }
}

fn score_financial(sheet: &mut SignalSheet, extraction: &SocialPostGameData, game: &Game) {
    if let (Some(g), Some(e)) = (game.buy_in, extraction.extracted_buy_in) {
        let ratio = relative_diff(g, e);
        if (e - g).abs() < 0.005 {
            sheet.matched(SignalKey::BuyInExact, json!(g), json!(e), "buy-in equal");
            sheet.not_applicable(SignalKey::BuyInClose, "buy-in exact matched");
            sheet.not_applicable(SignalKey::BuyInMismatch, "buy-in exact matched");
        } else if ratio <= 0.10 {
            sheet.missed(SignalKey::BuyInExact, json!(g), json!(e), "buy-in differs");
            sheet.matched(
                SignalKey::BuyInClose,
                json!(g),
                json!(e),
                format!("buy-in within {:.1}%", ratio * 100.0),
            );
            sheet.not_applicable(SignalKey::BuyInMismatch, "buy-in close matched");
        } else {
            sheet.missed(SignalKey::BuyInExact, json!(g), json!(e), "buy-in differs");
            sheet.missed(SignalKey::BuyInClose, json!(g), json!(e), "buy-in outside 10%");
            sheet.matched(
                SignalKey::BuyInMismatch,
                json!(g),
                json!(e),
                format!("buy-in differs by {:.1}%", ratio * 100.0),
            );
        }
    }

    if let (Some(g), Some(e)) = (game.guarantee_amount.filter(|g| *g > 0.0), extraction.extracted_guarantee) {
        if relative_diff(g, e) < 0.05 {
            sheet.matched(SignalKey::GuaranteeMatch, json!(g), json!(e), "guarantee within 5%");
        } else {
            sheet.missed(SignalKey::GuaranteeMatch, json!(g), json!(e), "guarantee outside 5%");
        }
    }

    if let (Some(g), Some(e)) = (game.rake, extraction.extracted_rake) {
        if (g - e).abs() <= 2.0 {
            sheet.matched(SignalKey::RakeMatch, json!(g), json!(e), "rake within $2");
        } else {
            sheet.missed(SignalKey::RakeMatch, json!(g), json!(e), "rake differs by more than $2");
        }
    }
}

fn extracted_local_date(extraction: &SocialPostGameData, post_date: Option<DateTime<Utc>>) -> Option<NaiveDate> {
    extraction
        .extracted_date
        .as_deref()
        .and_then(parse_local_date)
        .or_else(|| post_date.map(local_date))
}

fn score_temporal(
    sheet: &mut SignalSheet,
    extraction: &SocialPostGameData,
    game: &Game,
    post_date: Option<DateTime<Utc>>,
) {
    let Some(start) = game.game_start_date_time else {
        return;
    };
    let game_day = local_date(start);

    if let Some(extracted_day) = extracted_local_date(extraction, post_date) {
        let days = (extracted_day - game_day).num_days().abs();
        let (g, e) = (json!(game_day.to_string()), json!(extracted_day.to_string()));
        match days {
            0 => {
                sheet.matched(SignalKey::DateExact, g, e, "same local day");
                sheet.not_applicable(SignalKey::DateClose, "date exact matched");
                sheet.not_applicable(SignalKey::DateMismatch, "date exact matched");
            }
            1 => {
                sheet.missed(SignalKey::DateExact, g.clone(), e.clone(), "1 day apart");
                sheet.matched(SignalKey::DateClose, g, e, "1 day apart");
                sheet.not_applicable(SignalKey::DateMismatch, "date close matched");
            }
            2..=3 => {
                let detail = format!("{days} days apart");
                sheet.missed(SignalKey::DateExact, g.clone(), e.clone(), detail.clone());
                sheet.missed(SignalKey::DateClose, g.clone(), e.clone(), detail.clone());
                sheet.missed(SignalKey::DateMismatch, g, e, detail);
            }
            _ => {
                let detail = format!("{days} days apart");
                sheet.missed(SignalKey::DateExact, g.clone(), e.clone(), detail.clone());
                sheet.missed(SignalKey::DateClose, g.clone(), e.clone(), detail.clone());
                sheet.matched(SignalKey::DateMismatch, g, e, detail);
            }
        }
    }

    if let Some(raw) = extraction.extracted_day_of_week.as_deref() {
        let extracted = raw.trim().to_ascii_uppercase();
        if extracted.len() >= 3 {
            let weekday = local_weekday(start).as_str();
            if weekday.contains(extracted.as_str()) || extracted.contains(weekday) {
                sheet.matched(SignalKey::DayOfWeekMatch, json!(weekday), json!(raw), "weekday matches");
            } else {
                sheet.missed(SignalKey::DayOfWeekMatch, json!(weekday), json!(raw), "weekday differs");
            }
        }
    }
}

fn score_venue(sheet: &mut SignalSheet, extraction: &SocialPostGameData, game: &Game) {
    let Some(venue) = game.venue_id.as_deref() else {
        return;
    };
    if let Some(extracted) = extraction.extracted_venue_id.as_deref() {
        if extracted == venue {
            sheet.matched(SignalKey::VenueExact, json!(venue), json!(extracted), "extracted venue is the game venue");
            sheet.not_applicable(SignalKey::VenueSuggested, "venue exact matched");
            return;
        }
        sheet.missed(SignalKey::VenueExact, json!(venue), json!(extracted), "extracted venue differs");
    }
    if let Some(suggested) = extraction.suggested_venue_id.as_deref() {
        if suggested == venue {
            sheet.matched(SignalKey::VenueSuggested, json!(venue), json!(suggested), "suggested venue is the game venue");
        } else {
            sheet.missed(SignalKey::VenueSuggested, json!(venue), json!(suggested), "suggested venue differs");
        }
    }
}

fn score_structure(sheet: &mut SignalSheet, extraction: &SocialPostGameData, game: &Game) {
    if let (Some(g), Some(e)) = (game.starting_stack.filter(|s| *s > 0.0), extraction.extracted_starting_stack) {
        if relative_diff(g, e) <= 0.10 {
            sheet.matched(SignalKey::StartingStackMatch, json!(g), json!(e), "starting stack within 10%");
        } else {
            sheet.missed(SignalKey::StartingStackMatch, json!(g), json!(e), "starting stack outside 10%");
        }
    }

    if let (Some(g), Some(e)) = (game.blind_level_minutes(), extraction.extracted_blind_level_minutes) {
        if (g - e).abs() <= 5.0 {
            sheet.matched(SignalKey::BlindLevelMatch, json!(g), json!(e), "levels within 5 minutes");
        } else {
            sheet.missed(SignalKey::BlindLevelMatch, json!(g), json!(e), "levels differ by more than 5 minutes");
        }
    }

    if let (Some(g), Some(e)) = (game.tournament_type, extraction.extracted_tournament_type) {
        let (gv, ev) = (json!(g.as_str()), json!(e.as_str()));
        if g == e {
            sheet.matched(SignalKey::TournamentTypeMatch, gv, ev, "tournament type equal");
            sheet.not_applicable(SignalKey::TournamentTypeMismatch, "tournament type matched");
        } else if g.conflicts_with(&e) {
            sheet.missed(SignalKey::TournamentTypeMatch, gv.clone(), ev.clone(), "tournament type differs");
            sheet.matched(SignalKey::TournamentTypeMismatch, gv, ev, "tournament types conflict");
        } else {
            sheet.missed(SignalKey::TournamentTypeMatch, gv.clone(), ev.clone(), "tournament type differs");
            sheet.missed(SignalKey::TournamentTypeMismatch, gv, ev, "tournament types compatible");
        }
    }
}

fn score_attributes(sheet: &mut SignalSheet, extraction: &SocialPostGameData, game: &Game) {
    if let (Some(g), Some(e)) = (game.total_entries, extraction.extracted_total_entries) {
        if (g - e).abs() <= 5 {
            sheet.matched(SignalKey::EntryCountMatch, json!(g), json!(e), "entries within 5");
        } else {
            sheet.missed(SignalKey::EntryCountMatch, json!(g), json!(e), "entries differ by more than 5");
        }
    }
}

fn score_content(sheet: &mut SignalSheet, content_type: Option<ContentType>, game: &Game) {
    let status = json!(game.game_status.as_str());
    match content_type {
        Some(ContentType::Result) => {
            if game.game_status.is_finished() {
                sheet.matched(SignalKey::ResultPostBonus, status, json!("RESULT"), "result post for a finished game");
            } else {
                sheet.missed(SignalKey::ResultPostBonus, status, json!("RESULT"), "game not finished");
            }
            sheet.not_applicable(SignalKey::PromoPostBonus, "result post");
        }
        Some(ContentType::Promotional) => {
            if matches!(game.game_status, GameStatus::Scheduled | GameStatus::Registering) {
                sheet.matched(SignalKey::PromoPostBonus, status, json!("PROMOTIONAL"), "promo post for an upcoming game");
            } else {
                sheet.missed(SignalKey::PromoPostBonus, status, json!("PROMOTIONAL"), "game not upcoming");
            }
            sheet.not_applicable(SignalKey::ResultPostBonus, "promotional post");
        }
        _ => {}
    }
}

/// Primary reason tag; depends only on the signal statuses.
pub fn derive_match_reason(statuses: &BTreeMap<SignalKey, SignalStatus>) -> MatchReason {
    let hit = |key: SignalKey| statuses.get(&key) == Some(&SignalStatus::Matched);
    let buy_in = hit(SignalKey::BuyInExact) || hit(SignalKey::BuyInClose);
    let date = hit(SignalKey::DateExact) || hit(SignalKey::DateClose);

    if hit(SignalKey::TournamentIdMatch) {
        MatchReason::TournamentIdMatch
    } else if buy_in && date {
        MatchReason::BuyinDateMatch
    } else if hit(SignalKey::VenueExact) || hit(SignalKey::VenueSuggested) {
        MatchReason::VenueMatch
    } else if date {
        MatchReason::DateMatch
    } else if buy_in {
        MatchReason::BuyinMatch
    } else {
        MatchReason::MultipleSignals
    }
}

pub fn score_candidate(extraction: &SocialPostGameData, game: &Game, options: &ScoreOptions) -> ScoreResult {
    let mut sheet = SignalSheet::new();
    score_identity(&mut sheet, extraction, game);
    score_financial(&mut sheet, extraction, game);
    score_temporal(&mut sheet, extraction, game, options.post_date);
    score_venue(&mut sheet, extraction, game);
    score_structure(&mut sheet, extraction, game);
    score_attributes(&mut sheet, extraction, game);
    score_content(&mut sheet, options.content_type.or(extraction.content_type), game);

    let signals = sheet.finish();
    let raw_score: f64 = signals.iter().map(|s| s.contribution).sum();
    let confidence = raw_score.round().clamp(0.0, 100.0);

    let mut categories: BTreeMap<SignalCategory, CategoryTotal> = SignalCategory::ALL
        .iter()
        .map(|c| {
            (
                *c,
                CategoryTotal {
                    score: 0.0,
                    max: c.max_score(),
                },
            )
        })
        .collect();
    for signal in &signals {
        if let Some(total) = categories.get_mut(&signal.category) {
            total.score += signal.contribution;
        }
    }

    let statuses = signals.iter().map(|s| (s.key, s.status)).collect();
    let thresholds = options.thresholds;
    let confidence_level = if confidence >= thresholds.high {
        ConfidenceLevel::High
    } else if confidence >= thresholds.medium {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    };

    ScoreResult {
        raw_score,
        confidence,
        confidence_level,
        match_reason: derive_match_reason(&statuses),
        would_auto_link: confidence >= thresholds.auto_link,
        thresholds,
        categories,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kr_core::TournamentType;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn game() -> Game {
        Game {
            id: "G1".into(),
            name: "Saturday Showdown".into(),
            venue_id: Some("V1".into()),
            entity_id: Some("E1".into()),
            game_start_date_time: Some(utc("2024-06-15T10:00:00Z")),
            game_status: GameStatus::Finished,
            ..Default::default()
        }
    }

    fn contribution(result: &ScoreResult, key: SignalKey) -> f64 {
        result.signals.iter().find(|s| s.key == key).unwrap().contribution
    }

    #[test]
    fn tournament_id_golden_path_caps_at_one_hundred() {
        let game = Game {
            tournament_id: Some(4242),
            buy_in: Some(100.0),
            ..game()
        };
        let extraction = SocialPostGameData {
            extracted_tournament_id: Some(4242),
            extracted_buy_in: Some(100.0),
            extracted_date: Some("2024-06-15".into()),
            content_type: Some(ContentType::Result),
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game, &ScoreOptions::default());
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.match_reason, MatchReason::TournamentIdMatch);
        assert!(result.would_auto_link);
        assert_eq!(result.confidence_level, ConfidenceLevel::High);
        assert_eq!(result.status(SignalKey::BuyInClose), SignalStatus::NotApplicable);
        assert_eq!(result.status(SignalKey::DateMismatch), SignalStatus::NotApplicable);
    }

    #[test]
    fn close_buy_in_and_adjacent_day_score_forty_seven() {
        let game = Game {
            buy_in: Some(110.0),
            game_status: GameStatus::Scheduled,
            ..game()
        };
        let extraction = SocialPostGameData {
            extracted_buy_in: Some(100.0),
            extracted_date: Some("2024-06-14".into()),
            extracted_venue_id: Some("V1".into()),
            content_type: Some(ContentType::Promotional),
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game, &ScoreOptions::default());
        assert_eq!(contribution(&result, SignalKey::BuyInClose), 12.0);
        assert_eq!(contribution(&result, SignalKey::DateClose), 10.0);
        assert_eq!(contribution(&result, SignalKey::VenueExact), 20.0);
        assert_eq!(contribution(&result, SignalKey::PromoPostBonus), 5.0);
        assert_eq!(result.raw_score, 47.0);
        assert_eq!(result.confidence, 47.0);
        assert!(!result.would_auto_link);
        assert_eq!(result.match_reason, MatchReason::BuyinDateMatch);
        assert_eq!(result.status(SignalKey::VenueSuggested), SignalStatus::NotApplicable);
    }

    #[test]
    fn mismatch_penalties_clamp_to_zero() {
        let game = Game {
            buy_in: Some(100.0),
            game_start_date_time: Some(utc("2024-06-14T14:00:00Z")),
            ..game()
        };
        let extraction = SocialPostGameData {
            extracted_buy_in: Some(200.0),
            extracted_date: Some("2024-06-01".into()),
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game, &ScoreOptions::default());
        assert_eq!(contribution(&result, SignalKey::BuyInMismatch), -10.0);
        assert_eq!(contribution(&result, SignalKey::DateMismatch), -15.0);
        assert_eq!(result.raw_score, -25.0);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.above_minimum());
    }

    #[test]
    fn at_most_one_tier_matches_per_group() {
        for (buy_in, date) in [(100.0, "2024-06-15"), (105.0, "2024-06-16"), (300.0, "2024-06-17"), (300.0, "2024-06-25")] {
            let game = Game {
                buy_in: Some(100.0),
                ..game()
            };
            let extraction = SocialPostGameData {
                extracted_buy_in: Some(buy_in),
                extracted_date: Some(date.into()),
                ..Default::default()
            };
            let result = score_candidate(&extraction, &game, &ScoreOptions::default());
            for group in [
                [SignalKey::BuyInExact, SignalKey::BuyInClose, SignalKey::BuyInMismatch],
                [SignalKey::DateExact, SignalKey::DateClose, SignalKey::DateMismatch],
            ] {
                let matched = group.iter().filter(|k| result.is_matched(**k)).count();
                assert!(matched <= 1, "{group:?} for {buy_in}/{date}");
            }
        }
    }

    #[test]
    fn missing_values_are_not_evaluated() {
        let result = score_candidate(&SocialPostGameData::default(), &game(), &ScoreOptions::default());
        assert_eq!(result.status(SignalKey::BuyInExact), SignalStatus::NotEvaluated);
        assert_eq!(result.status(SignalKey::ResultPostBonus), SignalStatus::NotEvaluated);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.match_reason, MatchReason::MultipleSignals);
        assert_eq!(result.signals.len(), CATALOG.len());
    }

    #[test]
    fn date_falls_back_to_post_date() {
        let options = ScoreOptions {
            post_date: Some(utc("2024-06-15T22:00:00Z")),
            ..Default::default()
        };
        // 22:00Z on the 15th is the 16th locally.
        let result = score_candidate(&SocialPostGameData::default(), &game(), &options);
        assert!(result.is_matched(SignalKey::DateClose));
        assert_eq!(result.match_reason, MatchReason::DateMatch);
    }

    #[test]
    fn names_structure_and_entries_contribute() {
        let game = Game {
            recurring_game_name: Some("Saturday Showdown".into()),
            tournament_type: Some(TournamentType::Freezeout),
            starting_stack: Some(20000.0),
            total_entries: Some(120),
            ..game()
        };
        let extraction = SocialPostGameData {
            extracted_recurring_game_name: Some("SATURDAY SHOWDOWN $5k GTD".into()),
            extracted_tournament_type: Some(TournamentType::Rebuy),
            extracted_starting_stack: Some(21000.0),
            extracted_total_entries: Some(118),
            extracted_day_of_week: Some("Sat".into()),
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game, &ScoreOptions::default());
        assert!(result.is_matched(SignalKey::RecurringNameMatch));
        assert_eq!(result.status(SignalKey::RecurringNameFuzzy), SignalStatus::NotApplicable);
        assert!(result.is_matched(SignalKey::TournamentTypeMismatch));
        assert!(result.is_matched(SignalKey::StartingStackMatch));
        assert!(result.is_matched(SignalKey::EntryCountMatch));
        assert!(result.is_matched(SignalKey::DayOfWeekMatch));
        // 15 + 8 + 10 + 8 - 8
        assert_eq!(result.raw_score, 33.0);
        assert_eq!(result.categories[&SignalCategory::Identity].max, 115.0);
        assert_eq!(result.categories[&SignalCategory::Structure].score, 0.0);
    }

    #[test]
    fn fuzzy_name_needs_shared_significant_words() {
        let game = Game {
            name: "Sunday Deepstack Championship".into(),
            ..game()
        };
        let extraction = SocialPostGameData {
            extracted_recurring_game_name: Some("Championship Sunday".into()),
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game, &ScoreOptions::default());
        assert!(result.is_matched(SignalKey::RecurringNameFuzzy));
        assert_eq!(result.status(SignalKey::RecurringNameMatch), SignalStatus::NotMatched);
    }

    #[test]
    fn reason_is_a_function_of_statuses() {
        let mut statuses = BTreeMap::new();
        statuses.insert(SignalKey::VenueSuggested, SignalStatus::Matched);
        statuses.insert(SignalKey::BuyInClose, SignalStatus::Matched);
        assert_eq!(derive_match_reason(&statuses), MatchReason::VenueMatch);
        statuses.insert(SignalKey::DateExact, SignalStatus::Matched);
        assert_eq!(derive_match_reason(&statuses), MatchReason::BuyinDateMatch);
    }

    #[test]
    fn auto_link_threshold_is_honoured() {
        let extraction = SocialPostGameData {
            extracted_venue_id: Some("V1".into()),
            extracted_date: Some("2024-06-15".into()),
            content_type: Some(ContentType::Result),
            ..Default::default()
        };
        let options = ScoreOptions {
            thresholds: Thresholds {
                auto_link: 50.0,
                ..Thresholds::default()
            },
            ..Default::default()
        };
        let result = score_candidate(&extraction, &game(), &options);
        assert_eq!(result.confidence, 50.0);
        assert!(result.would_auto_link);
    }
}
