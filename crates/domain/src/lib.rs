//! Shared data model, error taxonomy, configuration, and LLM types for the
//! PageIndex Web control plane. This crate has no I/O of its own — the
//! gateway crate owns the store, the supervisors, and the HTTP surface;
//! this crate only defines the shapes they agree on.

pub mod chat;
pub mod config;
pub mod error;
pub mod job;
pub mod llm;
pub mod trace;
