#![warn(missing_docs)]
//! Contract sync engine
//!
//! Indexes contract uploads of a chain, recording each upload once the block carrying it is
//! irreversible.
//!
//! Entrypoint: [`crate::sync::SyncController`], run on its own task by [`crate::service::SyncService`]

#[allow(missing_docs)]
pub mod backlog;
pub mod client;
pub mod error;
pub mod extract;
#[allow(missing_docs)]
pub mod keys;
#[allow(missing_docs)]
pub mod pending;
#[allow(missing_docs)]
pub mod primitives;
pub mod service;
pub mod signer;
#[allow(missing_docs)]
pub mod store;
#[allow(missing_docs)]
pub mod sync;
pub mod traits;
#[allow(missing_docs)]
pub mod wire;
