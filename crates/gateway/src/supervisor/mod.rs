//! Job Supervisor and Chat Supervisor — the two
//! long-lived stateful services that own subprocess/LLM-run lifecycles on
//! top of the pure [`crate::stage`] classifier, [`crate::store`]
//! persistence and [`crate::broker`] fan-out.

pub mod chat;
pub mod job;
pub mod retrieval;
