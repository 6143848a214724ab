//! Game to social-post matching: candidate discovery, signal scoring,
//! reconciliation previews and the link lifecycle.

pub mod candidates;
pub mod config;
pub mod engine;
pub mod links;
pub mod reconcile;
pub mod scoring;

pub use candidates::{Candidate, CandidateFinder, CandidateSet, DiscoveryPath};
pub use config::{ConfigError, MatcherConfig, Thresholds};
pub use engine::{BatchMatchResponse, MatchOptions, MatchResponse, MatchSession, Matcher};
pub use links::{link_id, LinkOutcome, LinkWriter};
pub use scoring::{score_candidate, ScoreOptions, ScoreResult, SignalKey, SignalStatus};

pub const CRATE_NAME: &str = "kr-matcher";
