//! Application-facing contracts for persistence adapters.

pub mod repos;
