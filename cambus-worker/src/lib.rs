pub mod state;
pub mod worker;

pub use state::AppState;
pub use worker::{start_event_logger, start_expiry_worker};
