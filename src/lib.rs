//! Enrollment orchestrator: multi-step banking signup with SMS phone
//! verification, retrying remote calls, and a keyed hand-off store.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod routes;
pub mod submission;
pub mod supervisor;
pub mod verification;
pub mod wizard;
