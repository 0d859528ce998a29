//! Core library for weft, a multi-agent git worktree orchestrator.
//!
//! A run gives every agent its own worktree lane (branch plus linked
//! worktree) and integrates finished lanes into a per-run integration branch
//! through a strictly serialized merge queue. Everything that happens is
//! appended to a SQLite event ledger and fanned out live to subscribers.
//!
//! Quick start:
//! - Run the JSON-RPC daemon with [`daemon::start`].
//! - Load config via [`config::load`].
//! - Drive runs in-process with [`orchestrator::Orchestrator`].
//! - Rebuild an ordered timeline from streamed frames with [`reducer::reduce`].

pub mod adapters;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod hub;
pub mod lanes;
pub mod ledger;
pub mod logging;
pub mod merge_queue;
pub mod orchestrator;
pub mod reducer;
pub mod rpc;
