//! DMFlow core: prospect funnel tracking for social-selling outreach.
//!
//! The host app constructs one [`state::AppState`] and calls into the
//! service modules with it. The capture process links the same crate but only
//! touches [`capture`] and the shared container in [`bridge`].

pub mod bridge;
pub mod calendar;
pub mod capture;
pub mod db;
pub mod drafting;
pub mod entitlement;
pub mod error;
pub mod importer;
mod migrations;
pub mod notification;
pub mod outreach;
pub mod pipeline;
pub mod services;
pub mod shortcuts;
pub mod state;
pub mod stats;
pub mod sync_status;
pub mod types;
pub mod util;
pub mod widget;

pub use error::{FlowError, UserNotice};
pub use state::AppState;

/// Install the process-wide logger. `RUST_LOG` overrides the default `info`
/// filter. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
