//! Integration tests for process groups over the TCP backend.
//!
//! Each test stands up a real two-rank TCP group on loopback, one thread per
//! rank, and checks the tensor-level collectives end to end.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tandem_core::{check_close, Array, SeededRng, Tolerance};
use tandem_distributed::prelude::*;
use tandem_distributed::{exchange_expert_counts, global_gather, global_scatter};

// =============================================================================
// Test Helpers
// =============================================================================

fn loopback_endpoints(n: usize) -> Vec<String> {
    let listeners: Vec<_> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect()
}

/// Runs `f` on both ranks of a TCP group and returns `(rank0, rank1)`.
fn on_tcp_pair<T: Send + 'static>(topology: Topology, f: fn(&ProcessGroup) -> T) -> (T, T) {
    let endpoints = loopback_endpoints(2);
    let mut handles = Vec::new();
    for rank in 0..2 {
        let config = RendezvousConfig::new(rank, endpoints.clone())
            .with_topology(topology)
            .with_connect_timeout(Duration::from_secs(10));
        handles.push(thread::spawn(move || {
            let backend = TcpBackend::connect(config).unwrap();
            let pg = ProcessGroup::new(Arc::new(backend));
            let out = f(&pg);
            pg.barrier().unwrap();
            out
        }));
    }
    let r1 = handles.pop().unwrap().join().unwrap();
    let r0 = handles.pop().unwrap().join().unwrap();
    (r0, r1)
}

fn rank_input(rank: usize) -> Array {
    SeededRng::new(100 + rank as u64).uniform(&[10, 1000])
}

// =============================================================================
// Dense Collectives
// =============================================================================

#[test]
fn test_allreduce_equals_sum_on_both_topologies() {
    let expected = rank_input(0).add(&rank_input(1)).unwrap();
    for topology in [Topology::Mesh, Topology::Ring] {
        let (a, b) = on_tcp_pair(topology, |pg| {
            let mut t = rank_input(pg.rank());
            pg.all_reduce_tensor(&mut t, ReduceOp::Sum).unwrap();
            t
        });
        check_close(&a, &expected, Tolerance::default()).unwrap();
        check_close(&b, &expected, Tolerance::default()).unwrap();
    }
}

#[test]
fn test_scatter_splits_source_rows() {
    let (a, b) = on_tcp_pair(Topology::Mesh, |pg| {
        pg.scatter_tensor(&rank_input(pg.rank()), 1).unwrap()
    });
    let source = rank_input(1);
    assert_eq!(a, source.slice_rows(0..5).unwrap());
    assert_eq!(b, source.slice_rows(5..10).unwrap());
}

#[test]
fn test_alltoall_stacks_halves_in_sender_order() {
    let (a, b) = on_tcp_pair(Topology::Ring, |pg| {
        pg.all_to_all_tensor(&rank_input(pg.rank())).unwrap()
    });
    let (x0, x1) = (rank_input(0), rank_input(1));
    assert_eq!(a, vec![x0.slice_rows(0..5).unwrap(), x1.slice_rows(0..5).unwrap()]);
    assert_eq!(b, vec![x0.slice_rows(5..10).unwrap(), x1.slice_rows(5..10).unwrap()]);
}

#[test]
fn test_allgather_and_broadcast() {
    let (a, b) = on_tcp_pair(Topology::Ring, |pg| {
        let gathered = pg.all_gather_tensor(&rank_input(pg.rank())).unwrap();
        let mut t = rank_input(pg.rank());
        pg.broadcast_tensor(&mut t, 1).unwrap();
        (gathered, t)
    });
    assert_eq!(a.0, vec![rank_input(0), rank_input(1)]);
    assert_eq!(a.0, b.0);
    assert_eq!(a.1, rank_input(1));
    assert_eq!(b.1, rank_input(1));
}

// =============================================================================
// Expert Routing
// =============================================================================

#[test]
fn test_global_gather_inverts_global_scatter() {
    let (a, b) = on_tcp_pair(Topology::Mesh, |pg| {
        let mut rng = SeededRng::new(7 + pg.rank() as u64);
        let local = rng.randint(1, 4, &[4]).into_vec();
        let rows = local.iter().sum::<i64>() as usize;
        let input = rng.uniform(&[rows, 2]);
        let global = exchange_expert_counts(&local, pg).unwrap();
        let routed = global_scatter(&input, &local, &global, pg).unwrap();
        let back = global_gather(&routed, &local, &global, pg).unwrap();
        (input, back)
    });
    assert_eq!(a.0, a.1);
    assert_eq!(b.0, b.1);
}
