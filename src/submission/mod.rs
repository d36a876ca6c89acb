//! Submission: hand-off of the finished draft to account linking.

pub mod coordinator;
pub mod libsql_store;
pub mod migrations;
pub mod store;

pub use coordinator::{
    AccountLinker, FEDERATED_SIGNUP_KEY, FederatedSignup, HandoffReceipt, LoggingLinker,
    PASSWORD_SIGNUP_KEY, SubmissionCoordinator, SubmitOutcome, handoff_key,
};
pub use libsql_store::LibSqlStore;
pub use store::{KeyValueStore, MemoryStore};
