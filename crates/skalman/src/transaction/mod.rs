//! Transaction propagation and lifecycle.
//!
//! This module turns a method's propagation and access mode into concrete
//! resource-manager operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   TransactionCoordinator                     │
//! │  - plan(): propagation x ambient transaction -> plan         │
//! │  - execute(): begin / join / suspend around the call         │
//! │  - owners commit or roll back, joiners mark rollback-only    │
//! └──────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌──────────────────────────────┐  ┌───────────────────────────┐
//! │       ResourceManager        │  │    TransactionObserver    │
//! │  begin/commit/rollback/      │  │  (cache store) hears the  │
//! │  suspend/resume              │  │  effects of each outcome  │
//! └──────────────────────────────┘  └───────────────────────────┘
//! ```
//!
//! # State Machine
//!
//! A [`TransactionHandle`] moves `ACTIVE → {COMMITTED | ROLLED_BACK}`, with an
//! `ACTIVE → SUSPENDED → ACTIVE` detour while a `REQUIRES_NEW` or
//! `NOT_SUPPORTED` call runs, and `ACTIVE → MARKED_ROLLBACK` when a joined
//! call fails.

mod coordinator;
mod gate;
mod handle;
mod observer;

pub use coordinator::{TransactionCoordinator, TransactionPlan};
pub use gate::PersistenceGate;
pub use handle::{TransactionEffect, TransactionEffects, TransactionHandle, TransactionState};
pub use observer::TransactionObserver;
