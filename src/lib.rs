/// Wallet state and the balance events produced by handling credits and debits.
pub mod wallet;

/// Typed requests parsed from endpoint paths and JSON payloads.
pub mod command;

/// Persistence interface, plus "in memory" and SQLite implementations.
pub mod store;

/// Per-wallet mutual exclusion.
pub mod locks;

pub mod auth;

/// Pending mining rewards, settled into a wallet before it is used.
pub mod miner;

/// Best effort balance notifications to wallet owners.
pub mod notify;

/// Coordinates authorization, locking, settlement and persistence for every
/// wallet operation.
pub mod engine;

/// Maps requests to engine calls and results to wire payloads.
pub mod rpc;

pub mod config;

/// Bootstraps the engine behind a JSON lines transport. Lives here so
/// integration tests can use it.
pub mod bin_utils;
