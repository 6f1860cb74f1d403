//! End-to-end collective runs across two real worker processes.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_harness::{
    BackendKind, CollectiveKind, ExecutionMode, Harness, HarnessConfig, HarnessError, RunRequest,
    RunState, WorkerProgram,
};
use tempfile::TempDir;

fn harness(dir: &TempDir, seed: Option<u64>) -> Harness {
    let config = HarnessConfig {
        log_dir: dir.path().to_path_buf(),
        seed,
        connect_timeout_secs: 20,
        ..HarnessConfig::default()
    };
    Harness::new(config, WorkerProgram::new(env!("CARGO_BIN_EXE_tandem-worker")))
}

fn request(op: CollectiveKind, backend: BackendKind, mode: ExecutionMode, seed: Option<u64>) -> RunRequest {
    RunRequest {
        op,
        backend,
        mode,
        path_id: 0,
        seed,
    }
}

#[test]
fn test_every_collective_in_both_modes_and_topologies() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, None);
    for backend in [BackendKind::Mesh, BackendKind::Ring] {
        for mode in ExecutionMode::ALL {
            for op in CollectiveKind::ALL {
                let report = h
                    .run(&request(op, backend, mode, Some(1000)))
                    .unwrap_or_else(|e| panic!("{op} {mode} {backend}: {e}"));
                assert_eq!(report.seeds, vec![1000, 1001]);
                assert_eq!(report.history.last(), Some(&RunState::Verified));
            }
        }
    }
}

#[test]
fn test_process_id_seeds() {
    let dir = TempDir::new().unwrap();
    let report = harness(&dir, None)
        .run(&request(
            CollectiveKind::Allreduce,
            BackendKind::Mesh,
            ExecutionMode::Eager,
            None,
        ))
        .unwrap();
    let pid_seeds: Vec<u64> = report.pids.iter().map(|&p| u64::from(p)).collect();
    assert_eq!(report.seeds, pid_seeds);
    assert!(report.verdict.ranks.iter().all(|r| r.checked));
}

#[test]
fn test_raw_backend_path() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, None);
    for op in CollectiveKind::ALL.into_iter().filter(|op| op.supports_backend_path()) {
        let mut req = request(op, BackendKind::Ring, ExecutionMode::Graph, Some(7));
        req.path_id = 1;
        h.run(&req).unwrap_or_else(|e| panic!("{op}: {e}"));
    }
}

#[test]
fn test_no_backend_preference_uses_mesh() {
    let dir = TempDir::new().unwrap();
    let report = harness(&dir, None)
        .run(&request(
            CollectiveKind::GlobalGather,
            BackendKind::None,
            ExecutionMode::Eager,
            Some(5),
        ))
        .unwrap();
    assert_eq!(report.verdict.ranks.len(), 2);
}

#[test]
fn test_invalid_path_id_fails_before_launch() {
    let dir = TempDir::new().unwrap();
    let mut req = request(CollectiveKind::Alltoall, BackendKind::Mesh, ExecutionMode::Graph, Some(1));
    req.path_id = 1;
    let err = harness(&dir, None).run(&req).unwrap_err();
    assert!(matches!(err, HarnessError::InvalidSpec(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[cfg(unix)]
mod scripted {
    use super::*;
    use std::path::PathBuf;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        path
    }

    fn scripted_harness(dir: &TempDir, body: &str) -> Harness {
        let config = HarnessConfig {
            log_dir: dir.path().to_path_buf(),
            ..HarnessConfig::default()
        };
        let program =
            WorkerProgram::new("/bin/sh").with_leading_arg(script(dir, body).display().to_string());
        Harness::new(config, program)
    }

    #[test]
    fn test_crash_reports_worker_stderr() {
        let dir = TempDir::new().unwrap();
        let h = scripted_harness(&dir, "echo \"rank $2 lost its peer\" >&2\nexit 1");
        let err = h
            .run(&request(CollectiveKind::Broadcast, BackendKind::Mesh, ExecutionMode::Graph, None))
            .unwrap_err();
        match err {
            HarnessError::WorkerCrash { rank, stderr, .. } => {
                assert_eq!(rank, 0);
                assert!(stderr.contains("rank 0 lost its peer"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_crash_includes_log_of_rank_that_died_first() {
        let dir = TempDir::new().unwrap();
        let h = scripted_harness(
            &dir,
            "if [ \"$2\" = 1 ]; then\n  echo 'rank 1 index out of range' >&2\n  exit 2\nfi\nsleep 1\necho 'rank 0 lost peer 1' >&2\nexit 1",
        );
        let err = h
            .run(&request(CollectiveKind::Allreduce, BackendKind::Mesh, ExecutionMode::Graph, Some(5)))
            .unwrap_err();
        let text = err.to_string();
        match err {
            HarnessError::WorkerCrash {
                rank, stderr, peers, ..
            } => {
                assert_eq!(rank, 0);
                assert!(stderr.contains("rank 0 lost peer 1"));
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].rank, 1);
                assert!(peers[0].status.contains('2'), "{}", peers[0].status);
                assert!(peers[0].stderr.contains("rank 1 index out of range"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(text.contains("rank 1 index out of range"));
    }

    #[test]
    fn test_hung_peer_is_killed_and_reported() {
        let dir = TempDir::new().unwrap();
        let h = scripted_harness(
            &dir,
            "if [ \"$2\" = 1 ]; then\n  echo 'rank 1 waiting' >&2\n  exec sleep 600\nfi\nexit 1",
        );
        let err = h
            .run(&request(CollectiveKind::Broadcast, BackendKind::Mesh, ExecutionMode::Eager, Some(5)))
            .unwrap_err();
        match err {
            HarnessError::WorkerCrash { rank, peers, .. } => {
                assert_eq!(rank, 0);
                assert_eq!(peers.len(), 1);
                assert!(peers[0].status.starts_with("killed after"), "{}", peers[0].status);
                assert!(peers[0].stderr.contains("rank 1 waiting"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_text_on_stdout_is_malformed() {
        let dir = TempDir::new().unwrap();
        let h = scripted_harness(&dir, "echo 'all done'");
        let err = h
            .run(&request(CollectiveKind::Allgather, BackendKind::Mesh, ExecutionMode::Eager, Some(3)))
            .unwrap_err();
        match err {
            HarnessError::MalformedOutput { rank, preview, .. } => {
                assert_eq!(rank, 0);
                assert!(preview.starts_with("all done"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
