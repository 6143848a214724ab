//! Persisted entities. Attribute names are camelCase to match the stored items.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const STALE_REASON_NOT_FINISHED: &str = "GAME_STARTED_OVER_7_DAYS_AGO_NOT_FINISHED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Scheduled,
    Initiating,
    Registering,
    Running,
    ClockStopped,
    Finished,
    Completed,
    Cancelled,
    NotInUse,
    NotPublished,
    #[default]
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "SCHEDULED",
            GameStatus::Initiating => "INITIATING",
            GameStatus::Registering => "REGISTERING",
            GameStatus::Running => "RUNNING",
            GameStatus::ClockStopped => "CLOCK_STOPPED",
            GameStatus::Finished => "FINISHED",
            GameStatus::Completed => "COMPLETED",
            GameStatus::Cancelled => "CANCELLED",
            GameStatus::NotInUse => "NOT_IN_USE",
            GameStatus::NotPublished => "NOT_PUBLISHED",
            GameStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Completed)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    Tournament,
    CashGame,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TournamentType {
    Freezeout,
    Rebuy,
    Satellite,
    Deepstack,
    Bounty,
    Turbo,
    HyperTurbo,
    #[serde(other)]
    Other,
}

impl TournamentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentType::Freezeout => "FREEZEOUT",
            TournamentType::Rebuy => "REBUY",
            TournamentType::Satellite => "SATELLITE",
            TournamentType::Deepstack => "DEEPSTACK",
            TournamentType::Bounty => "BOUNTY",
            TournamentType::Turbo => "TURBO",
            TournamentType::HyperTurbo => "HYPER_TURBO",
            TournamentType::Other => "OTHER",
        }
    }

    /// Pairs of structures that cannot describe the same event.
    pub fn conflicts_with(&self, other: &TournamentType) -> bool {
        use TournamentType::*;
        matches!(
            (self, other),
            (Freezeout, Rebuy)
                | (Rebuy, Freezeout)
                | (Satellite, Rebuy)
                | (Rebuy, Satellite)
                | (Satellite, Freezeout)
                | (Freezeout, Satellite)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Extracted,
    Matched,
    Linked,
    ManualReview,
    Ignored,
    Rejected,
    Failed,
    #[serde(other)]
    Other,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Extracted => "EXTRACTED",
            ProcessingStatus::Matched => "MATCHED",
            ProcessingStatus::Linked => "LINKED",
            ProcessingStatus::ManualReview => "MANUAL_REVIEW",
            ProcessingStatus::Ignored => "IGNORED",
            ProcessingStatus::Rejected => "REJECTED",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Result,
    Promotional,
    General,
    #[serde(other)]
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Result => "RESULT",
            ContentType::Promotional => "PROMOTIONAL",
            ContentType::General => "GENERAL",
            ContentType::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    #[default]
    AutoMatched,
    Manual,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    TournamentIdMatch,
    BuyinDateMatch,
    VenueMatch,
    DateMatch,
    BuyinMatch,
    MultipleSignals,
    ManualLink,
    #[serde(other)]
    Other,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::TournamentIdMatch => "tournament_id_match",
            MatchReason::BuyinDateMatch => "buyin_date_match",
            MatchReason::VenueMatch => "venue_match",
            MatchReason::DateMatch => "date_match",
            MatchReason::BuyinMatch => "buyin_match",
            MatchReason::MultipleSignals => "multiple_signals",
            MatchReason::ManualLink => "manual_link",
            MatchReason::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancySeverity {
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "SUNDAY",
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
        }
    }

    /// Accepts full names and three-letter abbreviations in any case.
    pub fn from_name(name: &str) -> Option<DayOfWeek> {
        let upper = name.trim().to_ascii_uppercase();
        if !upper.is_ascii() || upper.len() < 3 {
            return None;
        }
        DayOfWeek::ALL.into_iter().find(|day| {
            let full = day.as_str();
            full == upper || (upper.len() == 3 && full.starts_with(upper.as_str()))
        })
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(value: Weekday) -> Self {
        match value {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurringFrequency {
    Weekly,
    Fortnightly,
    Monthly,
    Quarterly,
    Yearly,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    AutoAssigned,
    ManuallyAssigned,
    PendingAssignment,
    NotRecurring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BlindLevel {
    pub level: Option<i64>,
    pub small_blind: Option<f64>,
    pub big_blind: Option<f64>,
    pub ante: Option<f64>,
    pub duration_minutes: Option<f64>,
}

/// Authoritative tournament record, written by external savers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub venue_id: Option<String>,
    pub entity_id: Option<String>,
    pub tournament_id: Option<i64>,
    pub game_start_date_time: Option<DateTime<Utc>>,
    pub game_end_date_time: Option<DateTime<Utc>>,
    pub game_status: GameStatus,
    pub game_type: Option<GameType>,
    pub game_variant: Option<String>,
    pub tournament_type: Option<TournamentType>,
    pub buy_in: Option<f64>,
    pub rake: Option<f64>,
    pub guarantee_amount: Option<f64>,
    pub has_guarantee: Option<bool>,
    pub prizepool_paid: Option<f64>,
    pub prizepool_calculated: Option<f64>,
    pub starting_stack: Option<f64>,
    pub blind_levels: Option<Vec<BlindLevel>>,
    pub total_entries: Option<i64>,
    pub total_unique_players: Option<i64>,
    pub players_remaining: Option<i64>,
    pub is_series: Option<bool>,
    pub series_name: Option<String>,
    pub is_main_event: Option<bool>,
    pub is_satellite: Option<bool>,
    pub recurring_game_id: Option<String>,
    pub recurring_game_name: Option<String>,
    pub has_accumulator_tickets: Option<bool>,
    pub number_of_accumulator_tickets_paid: Option<i64>,
    pub accumulator_ticket_value: Option<f64>,
    pub is_status_data_stale: Option<bool>,
    pub status_data_stale_at: Option<DateTime<Utc>>,
    pub status_data_stale_reason: Option<String>,
    pub venue_name: Option<String>,
    pub venue_logo_cached: Option<String>,
    pub entity_name: Option<String>,
    pub source_url: Option<String>,
}

impl Game {
    /// Duration of the first level that declares one.
    pub fn blind_level_minutes(&self) -> Option<f64> {
        self.blind_levels
            .as_ref()?
            .iter()
            .find_map(|level| level.duration_minutes)
    }

    pub fn carries_accumulator_accounting(&self) -> bool {
        self.has_accumulator_tickets.unwrap_or(false)
            || self.number_of_accumulator_tickets_paid.is_some()
    }

    pub fn is_stale_flagged(&self) -> bool {
        self.is_status_data_stale.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialPost {
    pub id: String,
    pub social_account_id: Option<String>,
    pub entity_id: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub post_year_month: Option<String>,
    pub processing_status: ProcessingStatus,
    pub content_type: Option<ContentType>,
    pub linked_game_count: Option<i64>,
    pub primary_linked_game_id: Option<String>,
    pub has_unverified_links: Option<bool>,
    pub post_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialAccount {
    pub id: String,
    pub venue_id: Option<String>,
    pub entity_id: Option<String>,
    pub platform: Option<String>,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedReconciliation {
    pub total_cash_paid: Option<f64>,
    pub accumulator_ticket_count: Option<i64>,
    pub accumulator_ticket_value: Option<f64>,
    pub total_prizepool: Option<f64>,
}

/// Extraction record: the structured fields pulled out of one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialPostGameData {
    pub id: String,
    pub social_post_id: String,
    pub content_type: Option<ContentType>,
    pub extracted_buy_in: Option<f64>,
    pub extracted_date: Option<String>,
    pub extracted_venue_id: Option<String>,
    pub extracted_venue_name: Option<String>,
    pub suggested_venue_id: Option<String>,
    pub extracted_tournament_id: Option<i64>,
    pub extracted_recurring_game_name: Option<String>,
    pub extracted_guarantee: Option<f64>,
    pub extracted_rake: Option<f64>,
    pub extracted_total_entries: Option<i64>,
    pub extracted_starting_stack: Option<f64>,
    pub extracted_blind_level_minutes: Option<f64>,
    pub extracted_tournament_type: Option<TournamentType>,
    pub extracted_day_of_week: Option<String>,
    pub extracted_winner_name: Option<String>,
    pub extracted_winner_prize: Option<f64>,
    pub has_ticket_data: Option<bool>,
    pub total_tickets_extracted: Option<i64>,
    pub total_ticket_value: Option<f64>,
    pub ticket_count_by_type: Option<BTreeMap<String, i64>>,
    pub reconciliation: Option<ExtractedReconciliation>,
    pub has_advertised_tickets: Option<bool>,
    pub advertised_ticket_count: Option<i64>,
    pub advertised_ticket_type: Option<String>,
    pub advertised_ticket_value: Option<f64>,
}

impl SocialPostGameData {
    pub fn carries_ticket_data(&self) -> bool {
        self.has_ticket_data.unwrap_or(false)
            || self.total_tickets_extracted.unwrap_or(0) > 0
            || self
                .reconciliation
                .as_ref()
                .and_then(|r| r.accumulator_ticket_count)
                .unwrap_or(0)
                > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialPostGameLink {
    pub id: String,
    pub social_post_id: String,
    pub game_id: String,
    pub entity_id: Option<String>,
    pub link_type: LinkType,
    pub match_confidence: f64,
    pub match_reason: Option<MatchReason>,
    pub match_signals: Option<JsonValue>,
    pub is_primary_game: bool,
    pub mention_order: i64,
    pub has_ticket_data: bool,
    pub extracted_snapshot: Option<JsonValue>,
    pub reconciliation_preview: Option<JsonValue>,
    pub has_reconciliation_discrepancy: bool,
    pub reconciliation_discrepancy_severity: Option<DiscrepancySeverity>,
    pub linked_at: Option<DateTime<Utc>>,
    pub linked_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SocialPostGameLink {
    pub fn is_rejected(&self) -> bool {
        self.link_type == LinkType::Rejected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurringGame {
    pub id: String,
    pub name: String,
    pub venue_id: String,
    pub entity_id: Option<String>,
    pub day_of_week: Option<DayOfWeek>,
    pub frequency: Option<RecurringFrequency>,
    pub game_type: Option<GameType>,
    pub game_variant: Option<String>,
    pub start_time: Option<String>,
    pub typical_buy_in: Option<f64>,
    pub typical_guarantee: Option<f64>,
    pub is_active: Option<bool>,
    #[serde(rename = "dayOfWeek#name")]
    pub day_of_week_name: Option<String>,
    pub auto_created: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecurringGame {
    pub const COMPOSITE_KEY_ATTR: &'static str = "dayOfWeek#name";

    pub fn composite_key(day: DayOfWeek, name: &str) -> String {
        format!("{}#{}", day.as_str(), name)
    }

    pub fn composite_prefix(day: DayOfWeek) -> String {
        format!("{}#", day.as_str())
    }
}

/// Display fields shared by every projection row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectionFields {
    pub id: String,
    pub game_id: String,
    pub entity_id: Option<String>,
    pub venue_id: Option<String>,
    pub tournament_id: Option<i64>,
    pub name: String,
    pub venue_name: Option<String>,
    pub venue_logo_cached: Option<String>,
    pub entity_name: Option<String>,
    pub game_start_date_time: Option<DateTime<Utc>>,
    pub game_status: GameStatus,
    pub buy_in: Option<f64>,
    pub is_satellite: bool,
    pub is_recurring: bool,
    pub recurring_game_id: Option<String>,
    pub recurring_game_name: Option<String>,
    pub is_series: bool,
    pub series_name: Option<String>,
    pub is_main_event: bool,
    #[serde(rename = "_version")]
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveGame {
    #[serde(flatten)]
    pub common: ProjectionFields,
    pub total_entries: Option<i64>,
    pub total_unique_players: Option<i64>,
    pub players_remaining: Option<i64>,
    pub prizepool_paid: Option<f64>,
    pub prizepool_calculated: Option<f64>,
    pub guarantee_amount: Option<f64>,
    pub has_guarantee: bool,
    pub has_overlay: bool,
    pub refresh_interval_minutes: i64,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub refresh_count: i64,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpcomingGame {
    #[serde(flatten)]
    pub common: ProjectionFields,
    pub guarantee_amount: Option<f64>,
    pub has_guarantee: bool,
    pub game_type: Option<GameType>,
    pub game_variant: Option<String>,
    pub tournament_type: Option<TournamentType>,
    pub starting_stack: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecentlyFinishedGame {
    #[serde(flatten)]
    pub common: ProjectionFields,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_entries: Option<i64>,
    pub prizepool_paid: Option<f64>,
    pub guarantee_amount: Option<f64>,
    pub has_overlay: bool,
    pub ttl: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Entity {
    pub id: String,
    pub entity_name: String,
}
