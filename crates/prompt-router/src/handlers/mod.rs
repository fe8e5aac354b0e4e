//! HTTP request handlers for the Prompt Router.

pub mod health;
pub mod metrics;
pub mod prompts;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use prompts::submit_prompt;
