//! Rust library to orchestrate email synchronization.
//!
//! The main purpose of this library is to supervise one independent
//! sync worker per mailbox, on behalf of a set of configured
//! accounts, without caring about the protocol the workers speak.
//!
//! The [`SyncOrchestrator`](crate::orchestrator::SyncOrchestrator)
//! composes:
//!
//! - an [`AccountRegistry`](crate::account::AccountRegistry), which
//!   keeps the governed accounts and their selector,
//! - an [`ErrorTracker`](crate::error_tracker::ErrorTracker), which
//!   holds the failure state and the retry backoff of mailboxes,
//! - a [`CallbackHub`](crate::callback::CallbackHub), which fans
//!   status events out to observers,
//! - a [`WorkerSupervisor`](crate::worker::WorkerSupervisor), which
//!   spawns, wakes and stops workers.
//!
//! Protocol families plug in by implementing
//! [`WorkerFactory`](crate::worker::WorkerFactory) and
//! [`SyncWorker`](crate::worker::SyncWorker). Accounts and mailboxes
//! are read from an external
//! [`AccountStore`](crate::store::AccountStore).
//!
//! See scenarios in the /tests folder.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod account;
pub mod callback;
pub mod config;
mod error;
pub mod error_tracker;
pub mod logging;
pub mod mailbox;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod store;
pub mod worker;

#[doc(inline)]
pub use self::{
    error::{AnyBoxedError, AnyResult, Error, Result},
    orchestrator::{SyncOrchestrator, SyncOrchestratorBuilder},
};
