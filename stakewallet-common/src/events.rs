//! Wallet event bus
//!
//! Observers (UI, RPC notifiers, tests) subscribe by event name or to
//! `"all"`. Publishing never blocks and never fails: closed channels are
//! skipped. [`WalletEventBus`] is the stock [`NotificationSink`] handed to
//! the wallet.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::interfaces::NotificationSink;
use crate::types::OutPointInfo;

/// How a wallet transaction changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    New,
    Updated,
    Deleted,
}

/// Which local/authoritative disagreement was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchKind {
    /// Spent locally, unspent in the authoritative index
    LostCoin,
    /// Unspent locally, spent in the authoritative index
    MissedSpend,
}

/// Events published by the wallet engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    /// A wallet transaction was added, updated or erased
    TransactionChanged {
        txid: String,
        change: ChangeType,
    },
    /// Coin selection succeeded
    SelectionCompleted {
        strategy: String,
        selected: Vec<OutPointInfo>,
        target: u64,
        total: u64,
    },
    /// Coin selection failed at every tier
    SelectionFailed {
        strategy: String,
        target: u64,
        available: u64,
    },
    /// The reconciler found a spent-marker disagreement
    SpentMismatch {
        outpoint: OutPointInfo,
        kind: MismatchKind,
        value: u64,
        repaired: bool,
    },
}

impl WalletEvent {
    /// Subscription key for this event
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::TransactionChanged { .. } => "transaction_changed",
            WalletEvent::SelectionCompleted { .. } => "selection_completed",
            WalletEvent::SelectionFailed { .. } => "selection_failed",
            WalletEvent::SpentMismatch { .. } => "spent_mismatch",
        }
    }
}

/// Simple message bus for wallet events
#[derive(Default)]
pub struct WalletEventBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<Sender<WalletEvent>>>>>,
}

impl WalletEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all wallet events
    pub fn subscribe_all(&self) -> Receiver<WalletEvent> {
        self.subscribe("all")
    }

    /// Subscribe to one event name (see [`WalletEvent::name`]) or `"all"`
    pub fn subscribe(&self, event_type: &str) -> Receiver<WalletEvent> {
        let (sender, receiver) = mpsc::channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers
            .entry(event_type.to_lowercase())
            .or_default()
            .push(sender);
        receiver
    }

    /// Publish an event to its named subscribers and to `"all"`
    pub fn publish(&self, event: WalletEvent) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for key in [event.name(), "all"] {
            if let Some(senders) = subscribers.get(key) {
                for sender in senders {
                    // Closed receivers are ignored
                    let _ = sender.send(event.clone());
                }
            }
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.values().map(|v| v.len()).sum()
    }
}

impl NotificationSink for WalletEventBus {
    fn notify(&self, event: WalletEvent) {
        self.publish(event);
    }
}
