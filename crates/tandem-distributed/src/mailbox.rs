//! Mailbox - Blocking Tagged Message Queues
//!
//! Messages are keyed by `(src, dst, tag)` and delivered in FIFO order per key.
//! A receive blocks until a matching message arrives or the sender is marked
//! closed, in which case it fails with `PeerDisconnected` instead of hanging.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::backend::Tag;
use crate::error::{CommError, CommResult};

type Key = (usize, usize, Tag);

#[derive(Debug, Default)]
struct MailboxState {
    queues: HashMap<Key, VecDeque<Vec<f32>>>,
    closed: HashSet<usize>,
}

/// Shared message store used by the in-process and TCP backends.
#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    arrived: Condvar,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message and wakes any waiting receivers.
    pub fn deliver(&self, src: usize, dst: usize, tag: Tag, data: Vec<f32>) {
        let mut state = self.state.lock();
        state
            .queues
            .entry((src, dst, tag))
            .or_default()
            .push_back(data);
        self.arrived.notify_all();
    }

    /// Blocks until a message from `src` to `dst` with `tag` is available.
    pub fn take(&self, src: usize, dst: usize, tag: Tag) -> CommResult<Vec<f32>> {
        let key = (src, dst, tag);
        let mut state = self.state.lock();
        loop {
            if let Some(queue) = state.queues.get_mut(&key) {
                if let Some(data) = queue.pop_front() {
                    if queue.is_empty() {
                        state.queues.remove(&key);
                    }
                    return Ok(data);
                }
            }
            if state.closed.contains(&src) {
                return Err(CommError::PeerDisconnected { peer: src });
            }
            self.arrived.wait(&mut state);
        }
    }

    /// Marks `peer` as gone. Already queued messages stay readable.
    pub fn close(&self, peer: usize) {
        let mut state = self.state.lock();
        state.closed.insert(peer);
        self.arrived.notify_all();
    }

    /// Returns true once `peer` has been closed.
    pub fn is_closed(&self, peer: usize) -> bool {
        self.state.lock().closed.contains(&peer)
    }

    /// Number of undelivered messages.
    pub fn pending(&self) -> usize {
        self.state.lock().queues.values().map(VecDeque::len).sum()
    }
}
