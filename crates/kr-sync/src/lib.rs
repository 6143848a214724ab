//! Game-save side effects: recurring-template resolution and the
//! Active / Upcoming / RecentlyFinished projections.

pub mod projection;
pub mod recurring;

pub use projection::{
    status_class, ProjectionHints, ProjectionSync, StatusClass, SyncAction, SyncOptions, SyncOutcome,
};
pub use recurring::{score_template, RecurringResolution, RecurringResolver};

pub const CRATE_NAME: &str = "kr-sync";
