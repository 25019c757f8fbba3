use std::time::{Duration, Instant};

use rand::Rng;

use crate::command::Command;
use crate::node::{Node, Role};
use crate::types::{LogIndex, Message, NodeId};

/// Trait for state machines that can apply commands.
pub trait StateMachine<Cmd> {
    type Output;
    fn apply(&mut self, command: Cmd) -> Self::Output;
}

/// Events that drive the runtime.
pub enum Event<Cmd> {
    ElectionTimeout,
    HeartbeatTimeout,
    Message { from: NodeId, message: Message<Cmd> },
}

/// Timer configuration.
pub struct TimerConfig {
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(100),
        }
    }
}

/// Election deadlines are sampled uniformly from [T, T+90ms) on every arm so
/// nodes time out at different moments, preventing repeated split votes.
const ELECTION_JITTER_MS: u64 = 90;

/// Runtime that wraps a Raft node with timer management and a state machine.
///
/// All state lives in memory for the process lifetime; the node restarts
/// empty, at term 0, as a follower.
pub struct Runtime<Cmd, S: StateMachine<Cmd>> {
    node: Node<Cmd>,
    state_machine: S,
    config: TimerConfig,
    election_deadline: Instant,
    heartbeat_deadline: Instant,
    /// Outputs produced by applying committed entries, in log order.
    /// Drained by the caller via take_outputs after each handle() call.
    pending_outputs: Vec<(LogIndex, S::Output)>,
}

impl<Cmd: Clone, S: StateMachine<Cmd>> Runtime<Cmd, S> {
    pub fn new(node: Node<Cmd>, state_machine: S, config: TimerConfig) -> Self {
        let now = Instant::now();
        let mut runtime = Self {
            node,
            state_machine,
            election_deadline: now,
            heartbeat_deadline: now + config.heartbeat_interval,
            config,
            pending_outputs: Vec::new(),
        };
        runtime.arm_election_timer();
        runtime
    }

    pub fn node(&self) -> &Node<Cmd> {
        &self.node
    }

    pub fn state_machine(&self) -> &S {
        &self.state_machine
    }

    pub fn state_machine_mut(&mut self) -> &mut S {
        &mut self.state_machine
    }

    /// Process an event, apply any newly committed entries, and return the
    /// outbound commands.
    pub fn handle(&mut self, event: Event<Cmd>) -> Vec<Command<Cmd>> {
        let commands = match event {
            Event::ElectionTimeout => self.node.election_timeout(),
            Event::HeartbeatTimeout => self.node.heartbeat_timeout(),
            Event::Message { from, message } => self.handle_message(from, message),
        };

        self.process_commands(&commands);
        self.apply_committed();

        commands
    }

    /// §5.2: if the election timeout elapses without an accepted AppendEntries
    /// or a granted vote, start an election. Leaders suppress elections by
    /// heartbeating within each interval.
    pub fn poll_timers(&self) -> Option<Event<Cmd>> {
        let now = Instant::now();

        if now >= self.election_deadline {
            return Some(Event::ElectionTimeout);
        }

        if matches!(self.node.role, Role::Leader(_)) && now >= self.heartbeat_deadline {
            return Some(Event::HeartbeatTimeout);
        }

        None
    }

    /// Time until the next timer fires.
    pub fn next_deadline(&self) -> Instant {
        if matches!(self.node.role, Role::Leader(_)) {
            self.election_deadline.min(self.heartbeat_deadline)
        } else {
            self.election_deadline
        }
    }

    /// Submit a client command. Returns the log index if leader, None otherwise.
    pub fn submit(&mut self, command: Cmd) -> Option<LogIndex> {
        let index = self.node.submit_command(command);
        // A single-node cluster commits synchronously.
        self.apply_committed();
        index
    }

    /// Replace the election timeout and re-arm the timer from now.
    pub fn set_election_timeout(&mut self, timeout: Duration) {
        self.config.election_timeout = timeout;
        self.arm_election_timer();
    }

    /// Replace the heartbeat interval and re-arm the timer from now.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.config.heartbeat_interval = interval;
        self.heartbeat_deadline = Instant::now() + interval;
    }

    fn handle_message(&mut self, from: NodeId, message: Message<Cmd>) -> Vec<Command<Cmd>> {
        match message {
            Message::RequestVote(req) => self.node.handle_request_vote(from, req),
            Message::RequestVoteResponse(resp) => {
                self.node.handle_request_vote_response(from, resp)
            }
            Message::AppendEntries(req) => self.node.handle_append_entries(from, req),
            Message::AppendEntriesResponse(resp) => {
                self.node.handle_append_entries_response(from, resp)
            }
        }
    }

    fn arm_election_timer(&mut self) {
        let jitter = rand::rng().random_range(0..ELECTION_JITTER_MS);
        self.election_deadline =
            Instant::now() + self.config.election_timeout + Duration::from_millis(jitter);
    }

    fn process_commands(&mut self, commands: &[Command<Cmd>]) {
        for command in commands {
            match command {
                Command::ResetElectionTimer => self.arm_election_timer(),
                Command::ResetHeartbeatTimer => {
                    self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval;
                }
                Command::Send { .. } => {
                    // Sending is handled by the caller.
                }
            }
        }
    }

    /// Drain all state machine outputs accumulated since the last call.
    /// Each entry is (log_index, output) in application order.
    pub fn take_outputs(&mut self) -> Vec<(LogIndex, S::Output)> {
        std::mem::take(&mut self.pending_outputs)
    }

    // Figure 2, Rules for Servers (All Servers): if commitIndex > lastApplied,
    // apply the next entry. §5.3: state machines process entries in log order.
    fn apply_committed(&mut self) {
        while let Some(applied) = self.node.take_entry_to_apply() {
            let output = self.state_machine.apply(applied.command);
            self.pending_outputs.push((applied.index, output));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvCommand, KvStore};
    use crate::types::{AppendEntriesResponse, RequestVoteResponse, Term};

    fn runtime(id: u64, peers: &[u64]) -> Runtime<KvCommand, KvStore> {
        let node = Node::new(
            NodeId::from(id),
            peers.iter().map(|&p| NodeId::from(p)).collect(),
        );
        Runtime::new(node, KvStore::new(), TimerConfig::default())
    }

    fn elect(rt: &mut Runtime<KvCommand, KvStore>) {
        rt.handle(Event::ElectionTimeout);
        let term = rt.node().persistent.current_term;
        let peers = rt.node().peers.clone();
        for peer in peers {
            rt.handle(Event::Message {
                from: peer,
                message: Message::RequestVoteResponse(RequestVoteResponse {
                    term,
                    vote_granted: true,
                }),
            });
            if matches!(rt.node().role, Role::Leader(_)) {
                break;
            }
        }
        assert!(matches!(rt.node().role, Role::Leader(_)));
    }

    #[test]
    fn election_timeout_starts_election() {
        let mut rt = runtime(0, &[1, 2]);

        let commands = rt.handle(Event::ElectionTimeout);

        assert!(matches!(rt.node().role, Role::Candidate(_)));
        assert!(!commands.is_empty());
    }

    #[test]
    fn leader_applies_committed_entries() {
        let mut rt = runtime(0, &[1, 2]);
        elect(&mut rt);

        let index = rt.submit(KvCommand::Put {
            key: "foo".to_string(),
            value: 42,
        });
        assert_eq!(index, Some(LogIndex::from(1)));

        rt.handle(Event::Message {
            from: NodeId::from(1),
            message: Message::AppendEntriesResponse(AppendEntriesResponse {
                term: Term::from(1),
                success: true,
                match_index: LogIndex::from(1),
            }),
        });

        assert_eq!(rt.state_machine().get("foo"), Some(42));
    }

    #[test]
    fn take_outputs_returns_applied_results() {
        let mut rt = runtime(0, &[1, 2]);
        elect(&mut rt);

        rt.submit(KvCommand::Put {
            key: "k".to_string(),
            value: 1,
        });
        rt.submit(KvCommand::Delete {
            key: "ghost".to_string(),
        });
        rt.handle(Event::Message {
            from: NodeId::from(1),
            message: Message::AppendEntriesResponse(AppendEntriesResponse {
                term: Term::from(1),
                success: true,
                match_index: LogIndex::from(2),
            }),
        });

        // Put succeeds, Delete of an absent key reports failure.
        let outputs = rt.take_outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], (LogIndex::from(1), true));
        assert_eq!(outputs[1], (LogIndex::from(2), false));

        // Subsequent call returns nothing until new commits arrive.
        assert!(rt.take_outputs().is_empty());
    }

    #[test]
    fn single_node_commits_synchronously() {
        let mut rt = runtime(0, &[]);
        rt.handle(Event::ElectionTimeout);
        assert!(matches!(rt.node().role, Role::Leader(_)));

        rt.submit(KvCommand::Put {
            key: "solo".to_string(),
            value: 5,
        });

        assert_eq!(rt.node().volatile.commit_index, LogIndex::from(1));
        assert_eq!(rt.state_machine().get("solo"), Some(5));
    }

    #[test]
    fn timer_reset_on_election_timeout() {
        let mut rt = runtime(0, &[1, 2]);
        let initial_deadline = rt.election_deadline;

        std::thread::sleep(Duration::from_millis(10));
        rt.handle(Event::ElectionTimeout);

        assert!(rt.election_deadline > initial_deadline);
    }

    #[test]
    fn set_election_timeout_rearms_from_now() {
        let mut rt = runtime(0, &[1, 2]);

        rt.set_election_timeout(Duration::from_millis(5_000));

        let lower = Instant::now() + Duration::from_millis(4_000);
        assert!(rt.election_deadline > lower);
    }

    #[test]
    fn heartbeat_fires_only_for_leaders() {
        let mut rt = runtime(0, &[1, 2]);
        // Push the election deadline far out, then check the heartbeat
        // deadline is ignored while follower.
        rt.set_election_timeout(Duration::from_secs(60));
        rt.heartbeat_deadline = Instant::now() - Duration::from_millis(1);

        assert!(rt.poll_timers().is_none());
    }
}
