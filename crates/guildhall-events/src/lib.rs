//! Priority-ordered event pool for the Guildhall simulation kernel.
//!
//! The event pool is the nervous system the other components use to
//! communicate. Producers [`publish`] events at any time; the game loop
//! drains one batch per tick and dispatches it synchronously to
//! subscribers.
//!
//! # Modules
//!
//! - [`event`] -- The [`Event`] record, [`Priority`], and name grammar.
//! - [`pattern`] -- Exact and prefix-wildcard subscription patterns.
//! - [`pool`] -- The [`EventPool`] queue, subscriptions, and dispatch.
//! - [`error`] -- [`InvalidEventError`] and [`HandlerError`].
//!
//! [`publish`]: EventPool::publish

pub mod error;
pub mod event;
pub mod pattern;
pub mod pool;

pub use error::{HandlerError, InvalidEventError};
pub use event::{Event, EventName, Priority, RawEvent};
pub use pattern::Pattern;
pub use pool::{DispatchReport, EventPool, EventSeq, Handler, HandlerFailure, SubscriptionId};
