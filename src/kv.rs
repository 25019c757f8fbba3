use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::runtime::StateMachine;

/// Mutations replicated through the log. Reads never enter the log; they are
/// served directly from each node's applied state via [`KvStore::get`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCommand {
    Put { key: String, value: i32 },
    Delete { key: String },
}

/// A simple in-memory key-value store.
#[derive(Default)]
pub struct KvStore {
    data: HashMap<String, i32>,
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Local lookup against applied state. A follower may lag the leader by
    /// up to a heartbeat interval plus replication latency.
    pub fn get(&self, key: &str) -> Option<i32> {
        self.data.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl StateMachine<KvCommand> for KvStore {
    /// Whether the committed operation succeeded: a Put always does, a Delete
    /// only if the key existed. This is the signal a waiting proposer receives.
    type Output = bool;

    fn apply(&mut self, command: KvCommand) -> bool {
        match command {
            KvCommand::Put { key, value } => {
                self.data.insert(key, value);
                true
            }
            KvCommand::Delete { key } => self.data.remove(&key).is_some(),
        }
    }
}
