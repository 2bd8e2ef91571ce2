//! Session-scoped conversation history
//!
//! Append-only, in-memory, lost on restart by design. Turns are immutable
//! once recorded, so readers get cheap `Arc` snapshots.

use crate::trace::ConversationTurn;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct SessionHistory {
    turns: RwLock<Vec<Arc<ConversationTurn>>>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, turn: ConversationTurn) -> Arc<ConversationTurn> {
        let turn = Arc::new(turn);
        self.turns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&turn));
        turn
    }

    pub fn len(&self) -> usize {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all turns in arrival order.
    pub fn snapshot(&self) -> Vec<Arc<ConversationTurn>> {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
