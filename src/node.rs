use crate::command::Command;
use crate::state::{Candidate, Follower, Leader};
use crate::types::{
    AppendEntries, AppendEntriesResponse, LogEntry, LogIndex, Message, NodeId, RequestVote,
    RequestVoteResponse, Term,
};

/// Persistent state on all servers.
pub struct PersistentState<C> {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry<C>>,
}

/// Volatile state on all servers.
pub struct VolatileState {
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

/// Server role with associated state.
pub enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

/// A committed entry handed to the state machine, tagged with its log index.
pub struct Applied<C> {
    pub index: LogIndex,
    pub command: C,
}

/// A Raft node.
///
/// The node is a pure state machine: handlers take an input (timer expiry or
/// a peer message), mutate local state, and return the commands the runtime
/// must carry out. No I/O happens here.
pub struct Node<C> {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub persistent: PersistentState<C>,
    pub volatile: VolatileState,
    pub role: Role,
}

impl<C: Clone> Node<C> {
    /// Create a new node. Starts as follower with no known leader.
    pub fn new(id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            id,
            peers,
            persistent: PersistentState {
                current_term: Term::default(),
                voted_for: None,
                log: Vec::new(),
            },
            volatile: VolatileState {
                commit_index: LogIndex::default(),
                last_applied: LogIndex::default(),
            },
            role: Role::Follower(Follower { leader_id: None }),
        }
    }

    pub fn last_log_index(&self) -> LogIndex {
        LogIndex::from_length(self.persistent.log.len())
    }

    pub fn last_log_term(&self) -> Term {
        self.persistent
            .log
            .last()
            .map_or(Term::default(), |entry| entry.term)
    }

    /// Term of the entry at `index`. Index 0 reads as term 0 so the
    /// previous-entry check for the first real entry is always well defined.
    fn term_at(&self, index: LogIndex) -> Option<Term> {
        match index.to_array_index() {
            None => Some(Term::default()),
            Some(idx) => self.persistent.log.get(idx).map(|e| e.term),
        }
    }

    fn entry(&self, index: LogIndex) -> Option<&LogEntry<C>> {
        self.persistent.log.get(index.to_array_index()?)
    }

    /// ⌊N/2⌋+1 where N counts this node and all peers.
    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// The leader a client proposal should be redirected to, if one is known.
    pub fn known_leader(&self) -> Option<NodeId> {
        match &self.role {
            Role::Leader(_) => Some(self.id),
            Role::Follower(follower) => follower.leader_id,
            Role::Candidate(_) => None,
        }
    }

    /// Any observation of a higher term reverts the node to follower and
    /// clears its vote for the new term.
    fn become_follower(&mut self, term: Term, leader_id: Option<NodeId>) {
        self.persistent.current_term = term;
        self.persistent.voted_for = None;
        self.role = Role::Follower(Follower { leader_id });
    }

    /// Called when the election timer fires. A leader ignores the tick (the
    /// timer re-arms and keeps running); a follower or candidate abandons
    /// whatever campaign was in flight and starts a fresh one (stale vote
    /// replies are dropped by the term check).
    pub fn election_timeout(&mut self) -> Vec<Command<C>> {
        match &self.role {
            Role::Leader(_) => vec![Command::ResetElectionTimer],
            Role::Follower(_) | Role::Candidate(_) => self.start_election(),
        }
    }

    fn start_election(&mut self) -> Vec<Command<C>> {
        self.persistent.current_term = self.persistent.current_term.increment();
        self.persistent.voted_for = Some(self.id);
        self.role = Role::Candidate(Candidate {
            votes_received: vec![self.id],
        });

        let request = RequestVote {
            term: self.persistent.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };

        let mut commands = Vec::new();
        for &peer in &self.peers {
            commands.push(Command::Send {
                to: peer,
                message: Message::RequestVote(request.clone()),
            });
        }
        commands.push(Command::ResetElectionTimer);

        // A single-node cluster is its own quorum.
        if self.quorum() == 1 {
            commands.extend(self.become_leader());
        }
        commands
    }

    fn become_leader(&mut self) -> Vec<Command<C>> {
        let next = self.last_log_index().next();
        self.role = Role::Leader(Leader {
            next_index: self.peers.iter().map(|&p| (p, next)).collect(),
            match_index: self.peers.iter().map(|&p| (p, LogIndex::default())).collect(),
        });

        // One immediate round announces leadership without waiting a full
        // heartbeat interval.
        let mut commands = self.broadcast_append_entries();
        commands.push(Command::ResetHeartbeatTimer);
        commands
    }

    /// Called when the heartbeat timer fires. The same message carries both
    /// heartbeats and replication: entries from next_index onward, or none.
    pub fn heartbeat_timeout(&mut self) -> Vec<Command<C>> {
        if !matches!(self.role, Role::Leader(_)) {
            return Vec::new();
        }
        let mut commands = self.broadcast_append_entries();
        commands.push(Command::ResetHeartbeatTimer);
        commands
    }

    fn broadcast_append_entries(&self) -> Vec<Command<C>> {
        let Role::Leader(leader) = &self.role else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        for &peer in &self.peers {
            let next = leader.next_index_for(peer);
            let prev_log_index = next.prev().unwrap_or_default();
            let prev_log_term = self.term_at(prev_log_index).unwrap_or_default();
            let entries = match next.to_array_index() {
                Some(idx) => self
                    .persistent
                    .log
                    .get(idx..)
                    .unwrap_or_default()
                    .to_vec(),
                None => self.persistent.log.clone(),
            };

            commands.push(Command::Send {
                to: peer,
                message: Message::AppendEntries(AppendEntries {
                    term: self.persistent.current_term,
                    leader_id: self.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.volatile.commit_index,
                }),
            });
        }
        commands
    }

    pub fn handle_request_vote(&mut self, from: NodeId, req: RequestVote) -> Vec<Command<C>> {
        if req.term > self.persistent.current_term {
            self.become_follower(req.term, None);
        }

        let mut granted = false;
        if req.term == self.persistent.current_term {
            let vote_free = self.persistent.voted_for.is_none()
                || self.persistent.voted_for == Some(req.candidate_id);
            let ours_more_up_to_date = self.last_log_term() > req.last_log_term
                || (self.last_log_term() == req.last_log_term
                    && self.last_log_index() > req.last_log_index);
            if vote_free && !ours_more_up_to_date {
                self.persistent.voted_for = Some(req.candidate_id);
                granted = true;
            }
        }

        let mut commands = vec![Command::Send {
            to: from,
            message: Message::RequestVoteResponse(RequestVoteResponse {
                term: self.persistent.current_term,
                vote_granted: granted,
            }),
        }];
        if granted {
            commands.push(Command::ResetElectionTimer);
        }
        commands
    }

    pub fn handle_request_vote_response(
        &mut self,
        from: NodeId,
        resp: RequestVoteResponse,
    ) -> Vec<Command<C>> {
        if resp.term > self.persistent.current_term {
            self.become_follower(resp.term, None);
            return Vec::new();
        }
        if resp.term < self.persistent.current_term || !resp.vote_granted {
            return Vec::new();
        }

        let quorum = self.quorum();
        let Role::Candidate(candidate) = &mut self.role else {
            return Vec::new();
        };
        if !candidate.votes_received.contains(&from) {
            candidate.votes_received.push(from);
        }
        if candidate.votes_received.len() >= quorum {
            return self.become_leader();
        }
        Vec::new()
    }

    pub fn handle_append_entries(
        &mut self,
        from: NodeId,
        req: AppendEntries<C>,
    ) -> Vec<Command<C>> {
        if req.term < self.persistent.current_term {
            return vec![self.append_entries_response(from, false)];
        }

        // A live leader at this term or newer: fall in line behind it. The
        // vote is cleared only when the term actually advances; a same-term
        // candidate stepping down keeps its self-vote, otherwise it could
        // grant a second vote in the same term.
        if req.term > self.persistent.current_term {
            self.persistent.current_term = req.term;
            self.persistent.voted_for = None;
        }
        self.role = Role::Follower(Follower {
            leader_id: Some(req.leader_id),
        });

        let mut commands = vec![Command::ResetElectionTimer];

        let consistent = self.last_log_index() >= req.prev_log_index
            && self.term_at(req.prev_log_index) == Some(req.prev_log_term);
        if !consistent {
            commands.push(self.append_entries_response(from, false));
            return commands;
        }

        // Splice the batch in: the first conflicting entry discards it and
        // everything after it, then the rest of the batch (from the conflict
        // offset) is appended.
        let mut insert = req.prev_log_index.next();
        for (offset, entry) in req.entries.iter().enumerate() {
            match insert.to_array_index() {
                Some(idx) if idx < self.persistent.log.len() => {
                    if self.persistent.log[idx].term != entry.term {
                        self.persistent.log.truncate(idx);
                        self.persistent
                            .log
                            .extend(req.entries[offset..].iter().cloned());
                        break;
                    }
                }
                _ => {
                    self.persistent
                        .log
                        .extend(req.entries[offset..].iter().cloned());
                    break;
                }
            }
            insert = insert.next();
        }

        if req.leader_commit > self.volatile.commit_index {
            let new_commit = req.leader_commit.min(self.last_log_index());
            if new_commit > self.volatile.commit_index {
                self.volatile.commit_index = new_commit;
            }
        }

        commands.push(self.append_entries_response(from, true));
        commands
    }

    fn append_entries_response(&self, to: NodeId, success: bool) -> Command<C> {
        // A rejection carries no replication hint; match_index is only
        // meaningful on success.
        let match_index = if success {
            self.last_log_index()
        } else {
            LogIndex::default()
        };
        Command::Send {
            to,
            message: Message::AppendEntriesResponse(AppendEntriesResponse {
                term: self.persistent.current_term,
                success,
                match_index,
            }),
        }
    }

    pub fn handle_append_entries_response(
        &mut self,
        from: NodeId,
        resp: AppendEntriesResponse,
    ) -> Vec<Command<C>> {
        if resp.term > self.persistent.current_term {
            self.become_follower(resp.term, None);
            return Vec::new();
        }
        if resp.term < self.persistent.current_term {
            return Vec::new();
        }

        {
            let Role::Leader(leader) = &mut self.role else {
                return Vec::new();
            };
            if resp.success {
                leader.set_match_index(from, resp.match_index);
                leader.set_next_index(from, resp.match_index.next());
            } else {
                // Walk back one entry and retry with a longer prefix on the
                // next heartbeat, never below the first entry.
                let next = leader.next_index_for(from);
                if let Some(prev) = next.prev() {
                    if prev.to_array_index().is_some() {
                        leader.set_next_index(from, prev);
                    }
                }
            }
        }

        if resp.success {
            self.advance_commit_index();
        }
        Vec::new()
    }

    /// Figure 2, Rules for Leaders: advance commitIndex to the highest N with
    /// a quorum of matchIndex ≥ N and log[N].term == currentTerm. Entries from
    /// earlier terms commit only indirectly through such an N (§5.4.2).
    fn advance_commit_index(&mut self) {
        let quorum = self.quorum();
        let last = self.last_log_index();
        let current_term = self.persistent.current_term;

        let mut best = None;
        if let Role::Leader(leader) = &self.role {
            let mut candidate = self.volatile.commit_index.next();
            while candidate <= last {
                let replicated = 1 + leader
                    .match_index
                    .iter()
                    .filter(|(_, m)| *m >= candidate)
                    .count();
                // Replication counts only shrink at higher indices.
                if replicated < quorum {
                    break;
                }
                if self.term_at(candidate) == Some(current_term) {
                    best = Some(candidate);
                }
                candidate = candidate.next();
            }
        }
        if let Some(index) = best {
            self.volatile.commit_index = index;
        }
    }

    /// Submit a client command. Appends to the local log and returns the new
    /// entry's index if this node is the leader, None otherwise. The leader
    /// never overwrites or deletes its own entries.
    pub fn submit_command(&mut self, command: C) -> Option<LogIndex> {
        if !matches!(self.role, Role::Leader(_)) {
            return None;
        }
        self.persistent.log.push(LogEntry {
            term: self.persistent.current_term,
            command,
        });
        let index = self.last_log_index();
        // A single-node cluster commits without waiting for replies.
        self.advance_commit_index();
        Some(index)
    }

    /// Next committed-but-unapplied entry, advancing the apply cursor.
    /// Entries are surfaced strictly in log order.
    pub fn take_entry_to_apply(&mut self) -> Option<Applied<C>> {
        if self.volatile.last_applied >= self.volatile.commit_index {
            return None;
        }
        let index = self.volatile.last_applied.next();
        let entry = self.entry(index)?;
        let applied = Applied {
            index,
            command: entry.command.clone(),
        };
        self.volatile.last_applied = index;
        Some(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, peers: &[u64]) -> Node<String> {
        Node::new(
            NodeId::from(id),
            peers.iter().map(|&p| NodeId::from(p)).collect(),
        )
    }

    fn entry(term: u64, command: &str) -> LogEntry<String> {
        LogEntry {
            term: Term::from(term),
            command: command.to_string(),
        }
    }

    fn vote_request(term: u64, candidate: u64, last_index: u64, last_term: u64) -> RequestVote {
        RequestVote {
            term: Term::from(term),
            candidate_id: NodeId::from(candidate),
            last_log_index: LogIndex::from(last_index),
            last_log_term: Term::from(last_term),
        }
    }

    fn granted(commands: &[Command<String>]) -> bool {
        commands.iter().any(|c| {
            matches!(
                c,
                Command::Send {
                    message: Message::RequestVoteResponse(RequestVoteResponse {
                        vote_granted: true,
                        ..
                    }),
                    ..
                }
            )
        })
    }

    fn make_leader(n: &mut Node<String>) {
        n.election_timeout();
        let term = n.persistent.current_term;
        let voters: Vec<NodeId> = n.peers.clone();
        for peer in voters {
            n.handle_request_vote_response(
                peer,
                RequestVoteResponse {
                    term,
                    vote_granted: true,
                },
            );
            if matches!(n.role, Role::Leader(_)) {
                break;
            }
        }
        assert!(matches!(n.role, Role::Leader(_)));
    }

    #[test]
    fn election_timeout_starts_campaign() {
        let mut n = node(0, &[1, 2]);

        let commands = n.election_timeout();

        assert!(matches!(n.role, Role::Candidate(_)));
        assert_eq!(n.persistent.current_term, Term::from(1));
        assert_eq!(n.persistent.voted_for, Some(NodeId::from(0)));
        let sends = commands
            .iter()
            .filter(|c| matches!(c, Command::Send { .. }))
            .count();
        assert_eq!(sends, 2);
    }

    #[test]
    fn single_node_cluster_wins_immediately() {
        let mut n = node(0, &[]);

        n.election_timeout();

        assert!(matches!(n.role, Role::Leader(_)));
    }

    #[test]
    fn candidate_becomes_leader_on_quorum() {
        let mut n = node(0, &[1, 2, 3, 4]);
        n.election_timeout();

        n.handle_request_vote_response(
            NodeId::from(1),
            RequestVoteResponse {
                term: Term::from(1),
                vote_granted: true,
            },
        );
        assert!(matches!(n.role, Role::Candidate(_)));

        let commands = n.handle_request_vote_response(
            NodeId::from(2),
            RequestVoteResponse {
                term: Term::from(1),
                vote_granted: true,
            },
        );

        // Quorum of 3 out of 5 reached: leader, with an immediate round of
        // AppendEntries to every peer.
        assert!(matches!(n.role, Role::Leader(_)));
        let sends = commands
            .iter()
            .filter(|c| matches!(c, Command::Send { .. }))
            .count();
        assert_eq!(sends, 4);
    }

    #[test]
    fn duplicate_votes_do_not_reach_quorum() {
        let mut n = node(0, &[1, 2, 3, 4]);
        n.election_timeout();

        for _ in 0..3 {
            n.handle_request_vote_response(
                NodeId::from(1),
                RequestVoteResponse {
                    term: Term::from(1),
                    vote_granted: true,
                },
            );
        }

        assert!(matches!(n.role, Role::Candidate(_)));
    }

    #[test]
    fn candidate_steps_down_on_higher_term_reply() {
        let mut n = node(0, &[1, 2]);
        n.election_timeout();

        n.handle_request_vote_response(
            NodeId::from(1),
            RequestVoteResponse {
                term: Term::from(5),
                vote_granted: false,
            },
        );

        assert!(matches!(n.role, Role::Follower(_)));
        assert_eq!(n.persistent.current_term, Term::from(5));
        assert_eq!(n.persistent.voted_for, None);
    }

    #[test]
    fn vote_granted_to_up_to_date_candidate() {
        let mut n = node(1, &[0, 2]);

        let commands = n.handle_request_vote(NodeId::from(0), vote_request(1, 0, 0, 0));

        assert!(granted(&commands));
        assert_eq!(n.persistent.voted_for, Some(NodeId::from(0)));
        // Granting a vote resets the election timer.
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::ResetElectionTimer)));
    }

    #[test]
    fn vote_rejected_for_stale_term() {
        let mut n = node(1, &[0, 2]);
        n.persistent.current_term = Term::from(3);

        let commands = n.handle_request_vote(NodeId::from(0), vote_request(2, 0, 0, 0));

        assert!(!granted(&commands));
    }

    #[test]
    fn at_most_one_vote_per_term() {
        let mut n = node(2, &[0, 1]);

        assert!(granted(
            &n.handle_request_vote(NodeId::from(0), vote_request(1, 0, 0, 0))
        ));
        assert!(!granted(
            &n.handle_request_vote(NodeId::from(1), vote_request(1, 1, 0, 0))
        ));
        // The same candidate retrying is granted again.
        assert!(granted(
            &n.handle_request_vote(NodeId::from(0), vote_request(1, 0, 0, 0))
        ));
    }

    #[test]
    fn vote_rejected_when_our_log_is_more_up_to_date() {
        let mut n = node(1, &[0, 2]);
        n.persistent.log.push(entry(2, "a"));
        n.persistent.current_term = Term::from(2);

        // Candidate's last entry has a lower term.
        assert!(!granted(
            &n.handle_request_vote(NodeId::from(0), vote_request(3, 0, 5, 1))
        ));

        // Same last term but shorter log.
        n.persistent.log.push(entry(2, "b"));
        assert!(!granted(
            &n.handle_request_vote(NodeId::from(0), vote_request(4, 0, 1, 2))
        ));

        // Same last term, equal length: grant.
        assert!(granted(
            &n.handle_request_vote(NodeId::from(0), vote_request(5, 0, 2, 2))
        ));
    }

    #[test]
    fn append_entries_rejected_for_stale_term() {
        let mut n = node(1, &[0, 2]);
        n.persistent.current_term = Term::from(3);

        let commands = n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(2),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(0),
                prev_log_term: Term::from(0),
                entries: vec![],
                leader_commit: LogIndex::from(0),
            },
        );

        // No timer reset for a stale leader, just the rejection.
        assert!(!commands
            .iter()
            .any(|c| matches!(c, Command::ResetElectionTimer)));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Send {
                message: Message::AppendEntriesResponse(AppendEntriesResponse {
                    success: false,
                    ..
                }),
                ..
            }
        )));
    }

    #[test]
    fn append_entries_rejected_on_missing_prefix() {
        let mut n = node(1, &[0, 2]);

        let commands = n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(1),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(3),
                prev_log_term: Term::from(1),
                entries: vec![entry(1, "x")],
                leader_commit: LogIndex::from(0),
            },
        );

        // The timer still resets: the leader is live, only the prefix is
        // missing.
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::ResetElectionTimer)));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Send {
                message: Message::AppendEntriesResponse(AppendEntriesResponse {
                    success: false,
                    ..
                }),
                ..
            }
        )));
        assert!(n.persistent.log.is_empty());
    }

    #[test]
    fn append_entries_appends_and_commits() {
        let mut n = node(1, &[0, 2]);

        let commands = n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(1),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(0),
                prev_log_term: Term::from(0),
                entries: vec![entry(1, "a"), entry(1, "b")],
                leader_commit: LogIndex::from(1),
            },
        );

        assert_eq!(n.persistent.log.len(), 2);
        assert_eq!(n.volatile.commit_index, LogIndex::from(1));
        assert_eq!(n.known_leader(), Some(NodeId::from(0)));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Send {
                message: Message::AppendEntriesResponse(AppendEntriesResponse {
                    success: true,
                    match_index,
                    ..
                }),
                ..
            } if *match_index == LogIndex::from(2)
        )));
    }

    #[test]
    fn conflicting_suffix_is_replaced_from_conflict_offset() {
        let mut n = node(1, &[0, 2]);
        n.persistent.current_term = Term::from(2);
        n.persistent.log =
            vec![entry(1, "a"), entry(1, "old-b"), entry(1, "old-c")];

        n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(2),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(1),
                prev_log_term: Term::from(1),
                entries: vec![entry(2, "new-b"), entry(2, "new-c")],
                leader_commit: LogIndex::from(0),
            },
        );

        let commands: Vec<&str> = n
            .persistent
            .log
            .iter()
            .map(|e| e.command.as_str())
            .collect();
        assert_eq!(commands, vec!["a", "new-b", "new-c"]);
    }

    #[test]
    fn matching_entries_are_not_truncated() {
        let mut n = node(1, &[0, 2]);
        n.persistent.current_term = Term::from(1);
        n.persistent.log = vec![entry(1, "a"), entry(1, "b"), entry(1, "c")];

        // A retransmission of an old prefix must not shorten the log.
        n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(1),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(0),
                prev_log_term: Term::from(0),
                entries: vec![entry(1, "a")],
                leader_commit: LogIndex::from(0),
            },
        );

        assert_eq!(n.persistent.log.len(), 3);
    }

    #[test]
    fn same_term_step_down_keeps_vote() {
        let mut n = node(1, &[0, 2]);
        n.election_timeout();
        assert_eq!(n.persistent.current_term, Term::from(1));

        // Another node won term 1; its heartbeat demotes us but our self-vote
        // for term 1 stands.
        n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(1),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(0),
                prev_log_term: Term::from(0),
                entries: vec![],
                leader_commit: LogIndex::from(0),
            },
        );

        assert!(matches!(n.role, Role::Follower(_)));
        assert_eq!(n.persistent.voted_for, Some(NodeId::from(1)));
        assert!(!granted(
            &n.handle_request_vote(NodeId::from(2), vote_request(1, 2, 0, 0))
        ));
    }

    #[test]
    fn leader_commits_on_quorum() {
        let mut n = node(0, &[1, 2]);
        make_leader(&mut n);

        n.submit_command("x".to_string());
        assert_eq!(n.volatile.commit_index, LogIndex::from(0));

        n.handle_append_entries_response(
            NodeId::from(1),
            AppendEntriesResponse {
                term: n.persistent.current_term,
                success: true,
                match_index: LogIndex::from(1),
            },
        );

        assert_eq!(n.volatile.commit_index, LogIndex::from(1));
    }

    #[test]
    fn prior_term_entries_commit_only_indirectly() {
        let mut n = node(0, &[1, 2]);
        // An uncommitted entry from term 1 survives onto a term-2 leader.
        n.persistent.log.push(entry(1, "old"));
        n.persistent.current_term = Term::from(1);
        make_leader(&mut n);
        assert_eq!(n.persistent.current_term, Term::from(2));

        // Quorum on the old entry alone must not commit it.
        n.handle_append_entries_response(
            NodeId::from(1),
            AppendEntriesResponse {
                term: Term::from(2),
                success: true,
                match_index: LogIndex::from(1),
            },
        );
        assert_eq!(n.volatile.commit_index, LogIndex::from(0));

        // A current-term entry replicated to quorum commits both.
        n.submit_command("new".to_string());
        n.handle_append_entries_response(
            NodeId::from(1),
            AppendEntriesResponse {
                term: Term::from(2),
                success: true,
                match_index: LogIndex::from(2),
            },
        );
        assert_eq!(n.volatile.commit_index, LogIndex::from(2));
    }

    #[test]
    fn rejection_decrements_next_index_without_touching_match() {
        let mut n = node(0, &[1, 2]);
        n.persistent.log.push(entry(1, "a"));
        n.persistent.log.push(entry(1, "b"));
        n.persistent.current_term = Term::from(1);
        make_leader(&mut n);

        let term = n.persistent.current_term;
        n.handle_append_entries_response(
            NodeId::from(1),
            AppendEntriesResponse {
                term,
                success: false,
                match_index: LogIndex::from(0),
            },
        );

        let Role::Leader(leader) = &n.role else {
            panic!("expected leader");
        };
        assert_eq!(leader.next_index_for(NodeId::from(1)), LogIndex::from(2));
        assert_eq!(leader.match_index_for(NodeId::from(1)), LogIndex::from(0));
    }

    #[test]
    fn next_index_never_drops_below_one() {
        let mut n = node(0, &[1, 2]);
        make_leader(&mut n);
        let term = n.persistent.current_term;

        for _ in 0..3 {
            n.handle_append_entries_response(
                NodeId::from(1),
                AppendEntriesResponse {
                    term,
                    success: false,
                    match_index: LogIndex::from(0),
                },
            );
        }

        let Role::Leader(leader) = &n.role else {
            panic!("expected leader");
        };
        assert_eq!(leader.next_index_for(NodeId::from(1)), LogIndex::from(1));
    }

    #[test]
    fn leader_steps_down_on_higher_term_append_response() {
        let mut n = node(0, &[1, 2]);
        make_leader(&mut n);

        n.handle_append_entries_response(
            NodeId::from(1),
            AppendEntriesResponse {
                term: Term::from(9),
                success: false,
                match_index: LogIndex::from(0),
            },
        );

        assert!(matches!(n.role, Role::Follower(_)));
        assert_eq!(n.persistent.current_term, Term::from(9));
    }

    #[test]
    fn submit_rejected_when_not_leader() {
        let mut n = node(0, &[1, 2]);
        assert_eq!(n.submit_command("x".to_string()), None);
    }

    #[test]
    fn take_entry_to_apply_walks_commit_order() {
        let mut n = node(1, &[0, 2]);
        n.handle_append_entries(
            NodeId::from(0),
            AppendEntries {
                term: Term::from(1),
                leader_id: NodeId::from(0),
                prev_log_index: LogIndex::from(0),
                prev_log_term: Term::from(0),
                entries: vec![entry(1, "a"), entry(1, "b")],
                leader_commit: LogIndex::from(2),
            },
        );

        let first = n.take_entry_to_apply().expect("first entry");
        assert_eq!(first.index, LogIndex::from(1));
        assert_eq!(first.command, "a");
        let second = n.take_entry_to_apply().expect("second entry");
        assert_eq!(second.index, LogIndex::from(2));
        assert_eq!(second.command, "b");
        assert!(n.take_entry_to_apply().is_none());
    }
}
