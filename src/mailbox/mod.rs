//! Filesystem mailbox protocol.
//!
//! The mailbox is a directory tree used as the only communication channel
//! between the coordinator and its workers. An envelope's state is encoded
//! by which directory it lives in; the atomic rename of a claim is the sole
//! mutual-exclusion primitive.

pub mod envelope;
pub mod layout;
pub mod worker;

pub use envelope::{Completion, Envelope, Failure, HelpRequest, Instructions};
pub use layout::{MailboxLayout, WorkerId, DEFAULT_BASE_DIR};
pub use worker::{ClaimResult, Executor, HelpExecutor, Outcome, Worker};
