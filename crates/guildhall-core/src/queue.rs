//! Hand-off queues between the outside world and the tick thread.
//!
//! Both queues are cheap-to-clone handles over a shared FIFO. Collaborators
//! push from anywhere; the game loop drains once per tick.
//!
//! - [`InputQueue`] carries raw input commands that become events in the
//!   intake phase.
//! - [`TransactionQueue`] carries state transactions, typically submitted by
//!   event handlers. The built-in translator turns
//!   `command.transaction.submit` events into queued transactions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use guildhall_events::{Event, EventPool, HandlerError, InvalidEventError, Priority, SubscriptionId};
use guildhall_state::{StateOp, Transaction};
use guildhall_types::TransactionId;

/// Event name the transaction translator listens on.
pub const SUBMIT_TRANSACTION_EVENT: &str = "command.transaction.submit";

/// A raw input command awaiting intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    /// Event name, `domain.entity.action`.
    pub name: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
}

impl InputCommand {
    /// A normal-priority command.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            priority: Priority::Normal,
        }
    }

    /// Override the dispatch priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Convert to an event stamped now.
    pub fn into_event(self) -> Result<Event, InvalidEventError> {
        Ok(Event::new(&self.name, self.payload)?.with_priority(self.priority))
    }
}

/// Shared FIFO of [`InputCommand`]s.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    inner: Arc<Mutex<VecDeque<InputCommand>>>,
}

impl InputQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command for the next tick's intake.
    pub fn push(&self, command: InputCommand) {
        self.inner.lock().push_back(command);
    }

    /// Take every queued command in arrival order.
    pub fn drain(&self) -> Vec<InputCommand> {
        self.inner.lock().drain(..).collect()
    }

    /// Commands waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Shared FIFO of pending [`Transaction`]s, applied in submission order.
#[derive(Debug, Clone, Default)]
pub struct TransactionQueue {
    inner: Arc<Mutex<VecDeque<Transaction>>>,
}

impl TransactionQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `tx` and return its ID.
    pub fn submit(&self, tx: Transaction) -> TransactionId {
        let id = tx.id();
        self.inner.lock().push_back(tx);
        id
    }

    /// Take every queued transaction in submission order.
    pub fn drain(&self) -> Vec<Transaction> {
        self.inner.lock().drain(..).collect()
    }

    /// Transactions waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Payload of a `command.transaction.submit` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransaction {
    /// Operations, applied in order.
    pub ops: Vec<StateOp>,
    /// Optional label carried into logs and rejection events.
    #[serde(default)]
    pub label: Option<String>,
}

/// Subscribe a handler that turns `command.transaction.submit` events into
/// transactions on `queue`.
pub fn install_transaction_translator(
    pool: &EventPool,
    queue: TransactionQueue,
) -> Result<SubscriptionId, InvalidEventError> {
    pool.subscribe(SUBMIT_TRANSACTION_EVENT, move |event: &Event| {
        let submit: SubmitTransaction = serde_json::from_value(event.payload.clone())
            .map_err(|e| HandlerError::new(format!("malformed transaction payload: {e}")))?;
        if submit.ops.is_empty() {
            return Err(HandlerError::new("transaction has no operations"));
        }
        let mut tx = Transaction::new(submit.ops);
        if let Some(label) = submit.label {
            tx = tx.with_label(label);
        }
        let id = queue.submit(tx);
        debug!(transaction = %id, "Transaction queued from event");
        Ok(())
    })
}
