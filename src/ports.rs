//! Host port allocation from the configured band.
//!
//! Two checks per candidate: the caller's exclusion set (ports held by
//! running records) and a live OS probe — bind a listener on all interfaces
//! and release it immediately. The probe guards against drift between the
//! registry and sockets opened by processes outside this service.

use std::collections::HashSet;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::errors::DeployError;

pub struct PortAllocator {
    start: u16,
    end: u16,
    // Concurrent deploys must not both pick the same free port; scans are
    // serialized globally.
    scan_lock: Mutex<()>,
}

impl PortAllocator {
    /// `start..=end`, inclusive on both sides.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            scan_lock: Mutex::new(()),
        }
    }

    /// First port in ascending band order that is neither in `excluded`
    /// nor bound at the OS level right now.
    ///
    /// There is no reservation between this returning and the container
    /// binding the port; the gap is small and accepted.
    pub async fn allocate(&self, excluded: &HashSet<u16>) -> Result<u16, DeployError> {
        let _guard = self.scan_lock.lock().await;
        for port in self.start..=self.end {
            if excluded.contains(&port) {
                continue;
            }
            if Self::probe(port).await {
                return Ok(port);
            }
        }
        Err(DeployError::PortExhausted {
            start: self.start,
            end: self.end,
        })
    }

    async fn probe(port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bands up in the 491xx range so parallel tests don't trip over the
    // service's default 9100-9150 or each other.

    #[tokio::test]
    async fn allocates_lowest_free_port() {
        let allocator = PortAllocator::new(49100, 49105);
        let port = allocator.allocate(&HashSet::new()).await.unwrap();
        assert_eq!(port, 49100);
    }

    #[tokio::test]
    async fn skips_ports_in_exclusion_set() {
        let allocator = PortAllocator::new(49110, 49115);
        let excluded: HashSet<u16> = [49110, 49111].into_iter().collect();
        let port = allocator.allocate(&excluded).await.unwrap();
        assert_eq!(port, 49112);
    }

    #[tokio::test]
    async fn skips_ports_bound_at_os_level() {
        let held = TcpListener::bind(("0.0.0.0", 49120)).await.unwrap();
        let allocator = PortAllocator::new(49120, 49125);
        let port = allocator.allocate(&HashSet::new()).await.unwrap();
        assert_eq!(port, 49121);
        drop(held);
    }

    #[tokio::test]
    async fn exhausted_band_fails_with_port_exhaustion() {
        let allocator = PortAllocator::new(49130, 49131);
        let excluded: HashSet<u16> = [49130, 49131].into_iter().collect();
        let err = allocator.allocate(&excluded).await.unwrap_err();
        match err {
            DeployError::PortExhausted { start, end } => {
                assert_eq!(start, 49130);
                assert_eq!(end, 49131);
            }
            other => panic!("expected PortExhausted, got {}", other),
        }
    }

    #[tokio::test]
    async fn single_port_band_works() {
        let allocator = PortAllocator::new(49140, 49140);
        let port = allocator.allocate(&HashSet::new()).await.unwrap();
        assert_eq!(port, 49140);
    }
}
