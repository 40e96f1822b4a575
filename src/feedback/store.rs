//! Sequence storage collaborator

use crate::error::Result;
use crate::types::Symbol;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Append-only symbol history, keyed by session
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Append one symbol, returning the new length
    async fn append(&self, session: &str, symbol: Symbol) -> Result<usize>;

    /// The last `n` symbols, oldest first
    async fn tail(&self, session: &str, n: usize) -> Result<Vec<Symbol>>;

    async fn len(&self, session: &str) -> Result<usize>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemorySequenceStore {
    sessions: RwLock<HashMap<String, Vec<Symbol>>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn append(&self, session: &str, symbol: Symbol) -> Result<usize> {
        let mut sessions = self.sessions.write();
        let sequence = sessions.entry(session.to_string()).or_default();
        sequence.push(symbol);
        Ok(sequence.len())
    }

    async fn tail(&self, session: &str, n: usize) -> Result<Vec<Symbol>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(session)
            .map(|s| s[s.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default())
    }

    async fn len(&self, session: &str) -> Result<usize> {
        Ok(self.sessions.read().get(session).map_or(0, Vec::len))
    }
}
