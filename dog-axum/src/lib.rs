//! Library template created with FerrisUp

//! dog-axum: Axum adapter for DogRS tenant isolation.
//!
//! Mounts the tenant gate as a tower layer in front of every route and
//! exposes the admitted tenant to handlers through [`CurrentTenant`].

pub mod app;
pub mod extract;
pub mod middlewares;
pub mod state;
mod error;
pub use error::DogAxumError;
pub use extract::CurrentTenant;
pub use state::DogAxumState;

pub use app::{axum, AxumApp};
