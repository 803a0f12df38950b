//! Client library for a tiered, memory-first distributed file store.
//!
//! Files are split into fixed-size blocks served by workers; a master holds
//! the namespace and block commits. Reads dispatch per block on locality
//! (local cache, remote worker, or empty), writes stream append-only and
//! place blocks according to a write policy. See [`client::Client`] for the
//! entry point.

pub mod block;
pub mod buffer;
pub mod client;
pub mod conf;
pub mod context;
pub mod error;
pub mod kv;
pub mod master;
pub mod uri;
pub mod ustore;
pub mod worker;
