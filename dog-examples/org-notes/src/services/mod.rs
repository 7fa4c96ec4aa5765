pub mod notes;
pub mod webhooks;
