//! Real-time connection hub for Hiroba.
//!
//! This library accepts many concurrent bidirectional WebSocket links, tracks
//! which user and which room each link belongs to, and routes envelopes
//! between links with defined delivery and ordering semantics.

// layers
pub mod domain;
pub mod hub;
pub mod infrastructure;
pub mod ui;
