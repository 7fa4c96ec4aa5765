mod app;
mod services;

pub use app::{build, isolation_policy, load_config, request_principal, SCHEMA};
pub use services::notes::Note;
