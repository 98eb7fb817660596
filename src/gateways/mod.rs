//! Payment gateway abstraction
//!
//! Three external processors (plus a sandbox) behind one adapter contract,
//! a router that picks the adapter per request, and the HTTP/signature
//! plumbing they share.

pub mod adapter;
pub mod adapters;
pub mod error;
pub mod http;
pub mod router;
pub mod types;
