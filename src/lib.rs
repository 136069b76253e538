//! Telaio core engine.
//!
//! The in-process subsystem every Telaio deployment is built around:
//!
//! - **[`cache`]**: a process-wide store of lazily built cache handlers with
//!   change-driven invalidation, plus the change tracker that feeds it.
//! - **[`domain`]**: the node-tree snapshot, access rules, and the
//!   hierarchical access resolver.
//! - **[`handlers`]**: the concrete cache handlers (node tree, user profile,
//!   site configuration).
//! - **[`application`]**: repository traits the host wires to its storage.
//! - **[`infra`]**: Postgres and in-memory repository backends, telemetry.
//! - **[`config`]**: layered settings (file → environment).
//!
//! HTTP, rendering, and persistence schema management live in the host
//! application; this crate only reads through the repository traits and
//! appends to the change log.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod handlers;
pub mod infra;
