use serde::{Deserialize, Serialize};

use super::primitives::Term;

/// A single entry in the replicated log: the command a client proposed,
/// stamped with the term of the leader that created it. Entries are never
/// mutated in place; a follower may discard a conflicting suffix wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<Cmd> {
    pub term: Term,
    pub command: Cmd,
}
