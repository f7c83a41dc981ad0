//! Ricart–Agrawala mutual exclusion.
//!
//! A node that wants the critical section stamps a request with its Lamport
//! clock and multicasts it. Every peer answers at once unless it holds the
//! section, or wants it and its own request is ordered first; in that case
//! the request is queued and answered on release. The node holds the section
//! once every peer has answered.

use std::sync::{Condvar, Mutex, MutexGuard as LockGuard, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::queue::PendingQueue;
use super::tracker::ReplyTracker;
use super::{DistributedMutex, MutexGuard, State};
use crate::config::NodeConfig;
use crate::error::{Error, Result, TransportError};
use crate::order::lamport::LamportClock;
use crate::transport::{Ack, Grant, Handler, NodeId, PeerDirectory, Request};

#[derive(Debug, Default)]
struct Round {
    state: State,
    // Our outstanding request while WANTED or HELD
    request: Option<Request>,
}

pub struct Node {
    id: NodeId,
    config: NodeConfig,
    clock: LamportClock,
    queue: PendingQueue,
    replies: ReplyTracker,
    peers: OnceLock<PeerDirectory>,
    // State changes and reading the tally happen under this lock
    round: Mutex<Round>,
    quorum: Condvar,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        info!(node = %config.id, "creating node");
        Self {
            id: config.id.clone(),
            config,
            clock: LamportClock::new(),
            queue: PendingQueue::new(),
            replies: ReplyTracker::new(),
            peers: OnceLock::new(),
            round: Mutex::new(Round::default()),
            quorum: Condvar::new(),
        }
    }

    /// Install the peer set. Allowed once, before the first `enter`.
    pub fn connect(&self, peers: PeerDirectory) -> Result<()> {
        info!(node = %self.id, peers = peers.len(), "connected to peers");
        self.peers.set(peers).map_err(|_| Error::AlreadyConnected)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    pub fn state(&self) -> State {
        self.lock_round().state
    }

    /// Number of requests waiting for our release.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Multicast a request to every peer and hold the section if all of them
    /// grant it immediately.
    ///
    /// On [`Error::QuorumNotReached`] the node stays WANTED: deferred peers
    /// answer later and [`Node::wait_for_quorum`] picks that up, or the
    /// caller gives up with [`Node::withdraw`]. Nothing is retried here.
    pub fn enter(&self) -> Result<()> {
        let peers = self.peers()?;
        let req = {
            let mut round = self.lock_round();
            if round.state != State::Released {
                return Err(Error::InvalidState {
                    op: "enter",
                    state: round.state,
                });
            }
            let ts = self.clock.increment()?;
            self.replies.reset(ts);
            let req = Request::new(ts, self.id.clone());
            round.state = State::Wanted;
            round.request = Some(req.clone());
            req
        };
        info!(node = %self.id, ts = req.timestamp, "entered WANTED");

        let outcomes = self.multicast(peers, &req);
        let deferred = outcomes
            .iter()
            .filter(|(_, res)| matches!(res, Ok(Ack::Deferred)))
            .count();
        let failed = outcomes.iter().filter(|(_, res)| res.is_err()).count();

        let mut round = self.lock_round();
        if round.state != State::Wanted || round.request.as_ref() != Some(&req) {
            return Err(Error::InvalidState {
                op: "enter",
                state: round.state,
            });
        }
        let acks = self.replies.value();
        let required = peers.len();
        if acks >= required {
            round.state = State::Held;
            info!(node = %self.id, ts = req.timestamp, "entered HELD");
            return Ok(());
        }
        warn!(
            node = %self.id,
            ts = req.timestamp,
            acks, deferred, failed, required,
            "did not get enough replies"
        );
        Err(Error::QuorumNotReached {
            acks,
            deferred,
            failed,
            required,
        })
    }

    /// Block until every peer has answered the current round, then hold.
    ///
    /// `None` waits without bound.
    pub fn wait_for_quorum(&self, timeout: Option<Duration>) -> Result<()> {
        let required = self.peers()?.len();
        let start = Instant::now();
        let mut round = self.lock_round();
        loop {
            if round.state != State::Wanted {
                return Err(Error::InvalidState {
                    op: "wait for quorum",
                    state: round.state,
                });
            }
            let acks = self.replies.value();
            if acks >= required {
                round.state = State::Held;
                info!(node = %self.id, ts = self.replies.round(), "entered HELD");
                return Ok(());
            }
            round = match timeout {
                None => self.quorum.wait(round).unwrap_or_else(|e| e.into_inner()),
                Some(limit) => {
                    let waited = start.elapsed();
                    if waited >= limit {
                        warn!(node = %self.id, acks, required, ?waited, "quorum timed out");
                        return Err(Error::QuorumTimeout {
                            acks,
                            required,
                            waited,
                        });
                    }
                    self.quorum
                        .wait_timeout(round, limit - waited)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Leave the critical section and answer every deferred requester in
    /// arrival order.
    ///
    /// Returns how many requesters accepted their answer. A reply that fails
    /// in transport, or that the requester refuses because it already gave up
    /// that round, is logged and skipped; the rest of the queue still drains.
    pub fn exit(&self) -> Result<usize> {
        self.release_from(State::Held, "exit")
    }

    /// Give up a WANTED round. Deferred requesters are answered as on exit.
    pub fn withdraw(&self) -> Result<usize> {
        self.release_from(State::Wanted, "withdraw")
    }

    fn release_from(&self, from: State, op: &'static str) -> Result<usize> {
        let peers = self.peers()?;
        let deferred = {
            let mut round = self.lock_round();
            if round.state != from {
                return Err(Error::InvalidState {
                    op,
                    state: round.state,
                });
            }
            round.state = State::Released;
            round.request = None;
            let mut deferred = Vec::with_capacity(self.queue.len());
            while !self.queue.is_empty() {
                deferred.push(self.queue.dequeue()?);
            }
            self.quorum.notify_all();
            deferred
        };
        info!(node = %self.id, deferred = deferred.len(), "entered RELEASED");

        let mut delivered = 0;
        for req in deferred {
            let Some(peer) = peers.get(&req.requester) else {
                warn!(node = %self.id, requester = %req.requester, "deferred request from unknown peer");
                continue;
            };
            let timestamp = match self.clock.increment() {
                Ok(t) => t,
                Err(e) => {
                    warn!(node = %self.id, requester = %req.requester, "cannot stamp reply: {e}");
                    continue;
                }
            };
            let grant = Grant {
                timestamp,
                granter: self.id.clone(),
                round: req.timestamp,
            };
            match peer.reply(&grant) {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        node = %self.id,
                        ts = grant.timestamp,
                        requester = %req.requester,
                        "replying GO AHEAD"
                    );
                }
                Err(e) => warn!(node = %self.id, requester = %req.requester, "reply failed: {e}"),
            }
        }
        Ok(delivered)
    }

    // One thread per peer, joined before returning
    fn multicast(
        &self,
        peers: &PeerDirectory,
        req: &Request,
    ) -> Vec<(NodeId, Result<Ack, TransportError>)> {
        std::thread::scope(|s| {
            let sends = peers
                .iter()
                .map(|(id, peer)| {
                    let send = s.spawn(move || {
                        debug!(node = %self.id, peer = %id, ts = req.timestamp, "sending request");
                        let res = peer.request(req).and_then(|ack| {
                            if let Ack::Granted(t) = ack {
                                // a grant we cannot merge is not counted
                                self.clock.max_and_advance(t).map_err(|e| {
                                    TransportError::Rejected {
                                        peer: id.clone(),
                                        reason: e.to_string(),
                                    }
                                })?;
                                self.replies.increment(req.timestamp);
                            }
                            Ok(ack)
                        });
                        match &res {
                            Ok(Ack::Granted(_)) => debug!(node = %self.id, peer = %id, "granted"),
                            Ok(Ack::Deferred) => debug!(node = %self.id, peer = %id, "deferred"),
                            Err(e) => warn!(node = %self.id, peer = %id, "error sending request: {e}"),
                        }
                        res
                    });
                    (id, send)
                })
                .collect::<Vec<_>>();
            sends
                .into_iter()
                .map(|(id, send)| {
                    let res = send
                        .join()
                        .unwrap_or_else(|_| Err(TransportError::Unreachable(id.clone())));
                    (id.clone(), res)
                })
                .collect()
        })
    }

    fn peers(&self) -> Result<&PeerDirectory> {
        self.peers.get().ok_or(Error::NotConnected)
    }

    fn lock_round(&self) -> LockGuard<'_, Round> {
        self.round.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Handler for Node {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn on_request(&self, req: Request) -> Result<Ack> {
        let round = self.lock_round();
        let defer = match round.state {
            State::Held => true,
            State::Wanted => round.request.as_ref().is_some_and(|own| own.precedes(&req)),
            State::Released => false,
        };
        let now = self.clock.max_and_advance(req.timestamp)?;
        if defer {
            // enqueue under the round lock so a concurrent release cannot miss it
            info!(
                node = %self.id,
                ts = now,
                requester = %req.requester,
                state = %round.state,
                "deferring request"
            );
            self.queue.enqueue(req);
            return Ok(Ack::Deferred);
        }
        drop(round);
        let now = self.clock.increment()?;
        info!(node = %self.id, ts = now, requester = %req.requester, "replying GO AHEAD");
        Ok(Ack::Granted(now))
    }

    fn on_reply(&self, grant: Grant) -> Result<()> {
        self.clock.max_and_advance(grant.timestamp)?;
        let round = self.lock_round();
        let current = round.state == State::Wanted
            && round.request.as_ref().map(|r| r.timestamp) == Some(grant.round);
        match current.then(|| self.replies.increment(grant.round)).flatten() {
            Some(acks) => {
                debug!(node = %self.id, granter = %grant.granter, acks, "reply received");
                self.quorum.notify_all();
                Ok(())
            }
            None => Err(Error::StaleReply {
                round: grant.round,
                granter: grant.granter,
            }),
        }
    }
}

impl DistributedMutex for Node {
    fn acquire(&self) -> Result<MutexGuard<'_, Self>> {
        match self.enter() {
            Ok(()) => {}
            // everyone answered; some just have to release first
            Err(Error::QuorumNotReached { failed: 0, .. }) => {
                if let Err(e) = self.wait_for_quorum(self.config.quorum_timeout()) {
                    self.abandon();
                    return Err(e);
                }
            }
            Err(e @ Error::QuorumNotReached { .. }) => {
                self.abandon();
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        Ok(MutexGuard { mutex: self })
    }

    fn release(&self) -> Result<usize> {
        self.exit()
    }
}

impl Node {
    fn abandon(&self) {
        if let Err(e) = self.withdraw() {
            debug!(node = %self.id, "nothing to withdraw: {e}");
        }
    }
}
