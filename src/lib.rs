pub mod config;
pub mod coordination;
pub mod core;
pub mod error;
pub mod log;
pub mod mailbox;
pub mod manifest;

pub use config::Config;
pub use coordination::{Coordinator, Phase, ProgressSnapshot};
pub use core::{Task, TaskGraph, TaskId, TaskState};
pub use error::{Error, Result};
pub use mailbox::{Envelope, MailboxLayout, Worker, WorkerId};
pub use manifest::Manifest;
