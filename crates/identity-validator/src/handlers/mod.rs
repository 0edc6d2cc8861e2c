//! HTTP request handlers.

pub mod admin;
pub mod dev_token;
pub mod diagnostics;
pub mod health;
pub mod me;
pub mod metrics;

pub use admin::{get_admin, ADMIN_ROLE};
pub use dev_token::issue_dev_token;
pub use diagnostics::get_issuer_diagnostics;
pub use health::health_check;
pub use me::get_me;
pub use metrics::metrics_handler;
