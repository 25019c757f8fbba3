use crate::types::{LogIndex, NodeId};

/// Follower state - passive, responds to RPCs.
pub struct Follower {
    /// Last leader observed this term, used to redirect client proposals.
    pub leader_id: Option<NodeId>,
}

/// Candidate state - actively seeking votes.
pub struct Candidate {
    pub votes_received: Vec<NodeId>,
}

/// Leader state - manages replication.
///
/// Both maps are rebuilt on every election win: next_index to one past the
/// leader's last entry, match_index to zero.
pub struct Leader {
    pub next_index: Vec<(NodeId, LogIndex)>,
    pub match_index: Vec<(NodeId, LogIndex)>,
}

impl Leader {
    pub fn next_index_for(&self, peer: NodeId) -> LogIndex {
        self.next_index
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, index)| *index)
            .unwrap_or_else(|| LogIndex::from(1))
    }

    pub fn set_next_index(&mut self, peer: NodeId, index: LogIndex) {
        if let Some(slot) = self.next_index.iter_mut().find(|(id, _)| *id == peer) {
            slot.1 = index;
        }
    }

    pub fn match_index_for(&self, peer: NodeId) -> LogIndex {
        self.match_index
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, index)| *index)
            .unwrap_or_default()
    }

    pub fn set_match_index(&mut self, peer: NodeId, index: LogIndex) {
        if let Some(slot) = self.match_index.iter_mut().find(|(id, _)| *id == peer) {
            slot.1 = index;
        }
    }
}
