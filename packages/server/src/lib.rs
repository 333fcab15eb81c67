// Multi-tenant outbound communication engine.
//
// Renders personalized messages (template + optional AI enhancement) and
// dispatches them by SMS/email, driven by an event/job queue and a
// time-based scheduler that watches each tenant's operational database for
// things worth telling a customer about.

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;

pub use config::Config;
