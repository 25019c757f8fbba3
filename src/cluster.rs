use std::collections::{HashSet, VecDeque};

use crate::command::Command;
use crate::node::{Node, Role};
use crate::runtime::{Event, Runtime, StateMachine, TimerConfig};
use crate::types::{Message, NodeId};

/// A message in flight between nodes.
struct InFlight<C> {
    from: NodeId,
    to: NodeId,
    message: Message<C>,
}

/// Simulated cluster for testing.
///
/// Nodes are driven by explicit timer triggers and step-by-step message
/// delivery, so every scenario is deterministic. Partitions drop messages in
/// both directions at delivery time, which models the network losing them.
pub struct Cluster<C, S: StateMachine<C>> {
    runtimes: Vec<Runtime<C, S>>,
    messages: VecDeque<InFlight<C>>,
    partitioned: HashSet<NodeId>,
}

impl<C: Clone, S: StateMachine<C> + Default> Cluster<C, S> {
    /// Create a cluster with the given number of nodes, ids 0..size.
    pub fn new(size: usize) -> Self {
        let ids: Vec<NodeId> = (0..size).map(|i| NodeId::from(i as u64)).collect();

        let runtimes = ids
            .iter()
            .map(|&id| {
                let peers: Vec<NodeId> = ids.iter().filter(|&&p| p != id).copied().collect();
                let node = Node::new(id, peers);
                Runtime::new(node, S::default(), TimerConfig::default())
            })
            .collect();

        Self {
            runtimes,
            messages: VecDeque::new(),
            partitioned: HashSet::new(),
        }
    }

    /// Get a reference to a node's runtime by index (== node id).
    pub fn runtime(&self, index: usize) -> &Runtime<C, S> {
        &self.runtimes[index]
    }

    /// Get a mutable reference to a node's runtime by index (== node id).
    pub fn runtime_mut(&mut self, index: usize) -> &mut Runtime<C, S> {
        &mut self.runtimes[index]
    }

    /// Disconnect a node: all messages to or from it are dropped at delivery.
    pub fn partition(&mut self, index: usize) {
        self.partitioned.insert(self.runtimes[index].node().id);
    }

    /// Reconnect a previously partitioned node.
    pub fn heal(&mut self, index: usize) {
        self.partitioned.remove(&self.runtimes[index].node().id);
    }

    /// Drop every queued message without delivering it.
    pub fn drop_messages(&mut self) {
        self.messages.clear();
    }

    /// Trigger election timeout on a specific node.
    pub fn election_timeout(&mut self, index: usize) {
        let commands = self.runtimes[index].handle(Event::ElectionTimeout);
        self.queue_commands(index, commands);
    }

    /// Trigger heartbeat timeout on a specific node.
    pub fn heartbeat_timeout(&mut self, index: usize) {
        let commands = self.runtimes[index].handle(Event::HeartbeatTimeout);
        self.queue_commands(index, commands);
    }

    /// Deliver all pending messages, including ones generated along the way.
    pub fn deliver_all(&mut self) {
        while let Some(msg) = self.messages.pop_front() {
            self.deliver(msg);
        }
    }

    /// Deliver only the messages queued right now; replies they generate stay
    /// queued. Lets a test drop one direction of an exchange.
    pub fn deliver_round(&mut self) {
        for _ in 0..self.messages.len() {
            if let Some(msg) = self.messages.pop_front() {
                self.deliver(msg);
            }
        }
    }

    /// Deliver a single message and queue any responses.
    fn deliver(&mut self, inflight: InFlight<C>) {
        if self.partitioned.contains(&inflight.from) || self.partitioned.contains(&inflight.to) {
            return;
        }
        let to_index = self.node_index(inflight.to);
        if let Some(index) = to_index {
            let commands = self.runtimes[index].handle(Event::Message {
                from: inflight.from,
                message: inflight.message,
            });
            self.queue_commands(index, commands);
        }
    }

    /// Queue outgoing commands from a node.
    fn queue_commands(&mut self, from_index: usize, commands: Vec<Command<C>>) {
        let from_id = self.runtimes[from_index].node().id;
        for command in commands {
            if let Command::Send { to, message } = command {
                self.messages.push_back(InFlight {
                    from: from_id,
                    to,
                    message,
                });
            }
        }
    }

    /// Find runtime index by node ID.
    fn node_index(&self, id: NodeId) -> Option<usize> {
        self.runtimes.iter().position(|rt| rt.node().id == id)
    }

    /// Find the current leader, if any.
    pub fn leader(&self) -> Option<usize> {
        self.runtimes
            .iter()
            .position(|rt| matches!(rt.node().role, Role::Leader(_)))
    }

    /// Count nodes in each role.
    pub fn role_counts(&self) -> (usize, usize, usize) {
        let mut followers = 0;
        let mut candidates = 0;
        let mut leaders = 0;

        for rt in &self.runtimes {
            match rt.node().role {
                Role::Follower(_) => followers += 1,
                Role::Candidate(_) => candidates += 1,
                Role::Leader(_) => leaders += 1,
            }
        }

        (followers, candidates, leaders)
    }
}
