//! A framework that retries transactions and serializes the ones sharing a key.

#![cfg(feature = "framework")]

mod keyed_lock;
mod state;

pub use keyed_lock::*;
pub use state::*;
