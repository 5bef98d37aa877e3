//! Session management for the comparison gateway.
//!
//! A session holds one independent turn history per configured model,
//! entirely in memory — there is no disk-backed transcript or identity
//! linking here, just the store a generation is run against.

pub mod store;

pub use store::{Session, SessionStore};
