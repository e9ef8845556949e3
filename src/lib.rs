//! Durable human-in-the-loop blocking-question relay.
//!
//! A short-lived adapter process exposes three MCP tools and forwards every
//! call over a project-scoped Unix socket to a long-lived daemon. The daemon
//! persists pending questions to per-session JSONL logs so an out-of-band
//! actor (a human, via a messaging channel) can answer them minutes or hours
//! later, while the original caller polls or blocks waiting for the answer.

pub mod adapter;
pub mod cli;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod relay;
pub mod socket_path;
pub mod storage;
