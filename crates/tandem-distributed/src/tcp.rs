//! TCP Backend - Multi-Process Transport
//!
//! Rank `r` listens on `endpoints[r]`, dials every lower rank and accepts every
//! higher rank, so each pair shares exactly one connection. Each connection
//! gets a writer thread (fed through a channel so `send` never blocks on the
//! socket) and a reader thread that files incoming frames into a [`Mailbox`].
//!
//! Dropping the backend flushes and half-closes every connection, which is
//! what lets peers observe a clean shutdown.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::io::ErrorKind;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{check_rank, Backend, ReduceOp, Tag, COLLECTIVE_TAG_BIT};
use crate::error::{CommError, CommResult};
use crate::mailbox::Mailbox;
use crate::wire::{read_frame, write_frame, Frame};
use crate::{mesh, ring};

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// Configuration
// =============================================================================

/// Collective algorithm family used by a [`TcpBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Direct exchange with every peer.
    #[default]
    Mesh,
    /// Neighbour-only ring for all-reduce and all-gather.
    Ring,
}

/// Everything a rank needs to join the group.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// This process's rank.
    pub rank: usize,
    /// `host:port` of every rank, indexed by rank.
    pub endpoints: Vec<String>,
    /// Collective algorithm family.
    pub topology: Topology,
    /// How long to keep dialing / accepting peers.
    pub connect_timeout: Duration,
}

impl RendezvousConfig {
    /// Creates a mesh config with a 30 second connect timeout.
    pub fn new(rank: usize, endpoints: Vec<String>) -> Self {
        Self {
            rank,
            endpoints,
            topology: Topology::Mesh,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// =============================================================================
// TcpBackend
// =============================================================================

/// Backend whose ranks are separate processes connected over TCP.
pub struct TcpBackend {
    rank: usize,
    world_size: usize,
    topology: Topology,
    mailbox: Arc<Mailbox>,
    outboxes: Vec<Option<Sender<Frame>>>,
    writers: Vec<JoinHandle<()>>,
    seq: AtomicU64,
}

impl TcpBackend {
    /// Binds this rank's endpoint and connects to every peer.
    pub fn connect(config: RendezvousConfig) -> CommResult<Self> {
        let world_size = config.endpoints.len();
        let rank = config.rank;
        check_rank(rank, world_size)?;
        let deadline = Instant::now() + config.connect_timeout;

        let own = &config.endpoints[rank];
        let listener = TcpListener::bind(own.as_str())
            .map_err(|e| CommError::Rendezvous(format!("bind {}: {}", own, e)))?;
        debug!(rank, endpoint = %own, "listening for peers");

        let mut streams: Vec<Option<TcpStream>> = (0..world_size).map(|_| None).collect();

        for peer in 0..rank {
            let mut stream = dial(&config.endpoints[peer], deadline)?;
            write_frame(
                &mut stream,
                &Frame::Hello {
                    rank: rank as u32,
                    world_size: world_size as u32,
                },
            )?;
            debug!(rank, peer, "connected to lower rank");
            streams[peer] = Some(stream);
        }

        listener.set_nonblocking(true)?;
        for _ in rank + 1..world_size {
            let (peer, stream) = accept_peer(&listener, rank, world_size, deadline)?;
            if streams[peer].is_some() {
                return Err(CommError::Rendezvous(format!(
                    "rank {} connected twice",
                    peer
                )));
            }
            debug!(rank, peer, "accepted higher rank");
            streams[peer] = Some(stream);
        }

        let mailbox = Arc::new(Mailbox::new());
        let mut outboxes = Vec::with_capacity(world_size);
        let mut writers = Vec::new();
        for (peer, stream) in streams.into_iter().enumerate() {
            let Some(stream) = stream else {
                outboxes.push(None);
                continue;
            };
            stream.set_nodelay(true)?;
            spawn_reader(rank, peer, stream.try_clone()?, Arc::clone(&mailbox))?;
            let (tx, handle) = spawn_writer(rank, peer, stream)?;
            outboxes.push(Some(tx));
            writers.push(handle);
        }

        debug!(rank, world_size, topology = ?config.topology, "process group ready");
        Ok(Self {
            rank,
            world_size,
            topology: config.topology,
            mailbox,
            outboxes,
            writers,
            seq: AtomicU64::new(0),
        })
    }

    /// Returns the collective algorithm family in use.
    pub fn topology(&self) -> Topology {
        self.topology
    }
}

fn dial(endpoint: &str, deadline: Instant) -> CommResult<TcpStream> {
    loop {
        match TcpStream::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() >= deadline => {
                return Err(CommError::Rendezvous(format!(
                    "could not reach {}: {}",
                    endpoint, e
                )));
            }
            Err(_) => thread::sleep(RETRY_INTERVAL),
        }
    }
}

fn accept_peer(
    listener: &TcpListener,
    rank: usize,
    world_size: usize,
    deadline: Instant,
) -> CommResult<(usize, TcpStream)> {
    let mut stream = loop {
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(CommError::Rendezvous(format!(
                        "rank {} timed out waiting for higher ranks",
                        rank
                    )));
                }
                thread::sleep(RETRY_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    };
    stream.set_nonblocking(false)?;
    let remaining = deadline.saturating_duration_since(Instant::now());
    stream.set_read_timeout(Some(remaining.max(RETRY_INTERVAL)))?;
    let hello = read_frame(&mut stream)?;
    stream.set_read_timeout(None)?;

    match hello {
        Some(Frame::Hello {
            rank: peer,
            world_size: peer_world,
        }) => {
            let peer = peer as usize;
            if peer_world as usize != world_size {
                return Err(CommError::Rendezvous(format!(
                    "rank {} expects world size {}, we have {}",
                    peer, peer_world, world_size
                )));
            }
            if peer <= rank || peer >= world_size {
                return Err(CommError::Rendezvous(format!(
                    "unexpected hello from rank {}",
                    peer
                )));
            }
            Ok((peer, stream))
        }
        Some(other) => Err(CommError::Protocol(format!(
            "expected hello, got {:?}",
            other
        ))),
        None => Err(CommError::Rendezvous(
            "peer closed before hello".to_string(),
        )),
    }
}

fn spawn_reader(
    rank: usize,
    peer: usize,
    mut stream: TcpStream,
    mailbox: Arc<Mailbox>,
) -> CommResult<()> {
    thread::Builder::new()
        .name(format!("tandem-rx-{}", peer))
        .spawn(move || {
            loop {
                match read_frame(&mut stream) {
                    Ok(Some(Frame::Data { tag, payload })) => {
                        mailbox.deliver(peer, rank, tag, payload);
                    }
                    Ok(Some(Frame::Hello { .. })) => {
                        warn!(rank, peer, "unexpected hello after rendezvous");
                        break;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(rank, peer, error = %e, "reader stopped");
                        break;
                    }
                }
            }
            debug!(rank, peer, "peer connection closed");
            mailbox.close(peer);
        })?;
    Ok(())
}

fn spawn_writer(
    rank: usize,
    peer: usize,
    mut stream: TcpStream,
) -> CommResult<(Sender<Frame>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<Frame>();
    let handle = thread::Builder::new()
        .name(format!("tandem-tx-{}", peer))
        .spawn(move || {
            for frame in rx {
                if let Err(e) = write_frame(&mut stream, &frame) {
                    warn!(rank, peer, error = %e, "writer stopped");
                    return;
                }
            }
            let _ = stream.shutdown(Shutdown::Write);
        })?;
    Ok((tx, handle))
}

impl Backend for TcpBackend {
    fn name(&self) -> &'static str {
        match self.topology {
            Topology::Mesh => "tcp-mesh",
            Topology::Ring => "tcp-ring",
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send(&self, data: &[f32], dst: usize, tag: Tag) -> CommResult<()> {
        check_rank(dst, self.world_size)?;
        if dst == self.rank {
            self.mailbox.deliver(self.rank, self.rank, tag, data.to_vec());
            return Ok(());
        }
        let outbox = self.outboxes[dst]
            .as_ref()
            .ok_or(CommError::PeerDisconnected { peer: dst })?;
        outbox
            .send(Frame::Data {
                tag,
                payload: data.to_vec(),
            })
            .map_err(|_| CommError::PeerDisconnected { peer: dst })
    }

    fn recv(&self, src: usize, tag: Tag) -> CommResult<Vec<f32>> {
        check_rank(src, self.world_size)?;
        self.mailbox.take(src, self.rank, tag)
    }

    fn next_collective_tag(&self) -> Tag {
        COLLECTIVE_TAG_BIT | self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> CommResult<()> {
        match self.topology {
            Topology::Mesh => mesh::all_reduce(self, data, op),
            Topology::Ring => ring::all_reduce(self, data, op),
        }
    }

    fn all_gather(&self, data: &[f32]) -> CommResult<Vec<Vec<f32>>> {
        match self.topology {
            Topology::Mesh => mesh::all_gather(self, data),
            Topology::Ring => ring::all_gather(self, data),
        }
    }
}

impl Drop for TcpBackend {
    fn drop(&mut self) {
        self.outboxes.clear();
        for handle in self.writers.drain(..) {
            if handle.join().is_err() {
                warn!(rank = self.rank, "writer thread panicked");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
