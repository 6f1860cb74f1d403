//! Port - Free Port Allocation
//!
//! Ports are found by binding port 0 and reading back what the OS assigned.
//! The socket is released before the port is handed out, so a port can in
//! principle be taken by another process before the worker binds it.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashSet;
use std::net::TcpListener;

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{HarnessError, HarnessResult};

/// Attempts before giving up on finding an unused port.
pub const DEFAULT_MAX_ATTEMPTS: usize = 64;

/// Hands out distinct free ports on one host.
#[derive(Debug)]
pub struct PortAllocator {
    host: String,
    handed_out: HashSet<u16>,
    max_attempts: usize,
}

impl PortAllocator {
    /// Creates an allocator for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            handed_out: HashSet::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Host the ports are bound on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns a free port not previously returned by this allocator.
    pub fn allocate(&mut self) -> HarnessResult<u16> {
        for _ in 0..self.max_attempts {
            let listener = TcpListener::bind((self.host.as_str(), 0))
                .map_err(|e| HarnessError::PortAllocation(format!("bind {}:0: {}", self.host, e)))?;
            let port = listener.local_addr()?.port();
            drop(listener);
            if self.handed_out.insert(port) {
                debug!(port, "allocated port");
                return Ok(port);
            }
        }
        Err(HarnessError::PortAllocation(format!(
            "no new port after {} attempts",
            self.max_attempts
        )))
    }

    /// Allocates `n` distinct endpoints.
    pub fn allocate_endpoints(&mut self, n: usize) -> HarnessResult<Vec<Endpoint>> {
        (0..n)
            .map(|_| Ok(Endpoint::new(self.host.clone(), self.allocate()?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_distinct_and_bindable() {
        let mut allocator = PortAllocator::new("127.0.0.1");
        let endpoints = allocator.allocate_endpoints(4).unwrap();
        let ports: HashSet<u16> = endpoints.iter().map(|e| e.port).collect();
        assert_eq!(ports.len(), 4);
        for endpoint in &endpoints {
            assert_ne!(endpoint.port, 0);
            TcpListener::bind(endpoint.to_string()).unwrap();
        }
    }

    #[test]
    fn test_unresolvable_host_fails() {
        let mut allocator = PortAllocator::new("host.invalid");
        assert!(matches!(
            allocator.allocate(),
            Err(HarnessError::PortAllocation(_))
        ));
    }
}
