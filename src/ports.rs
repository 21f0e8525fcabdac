//! Loopback port allocation.
//!
//! Ports are probed by binding and immediately releasing a listener on
//! `127.0.0.1`. Nothing is reserved past the probe, so a concurrent process
//! may still claim the port before the child binds it.

use tokio::net::TcpListener;

use crate::error::{ManagerError, Result};

/// Finds the first bindable port at or above a preferred value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortAllocator;

impl PortAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Scans `preferred..=u16::MAX` and returns the first free port.
    pub async fn allocate(&self, preferred: u16) -> Result<u16> {
        for port in preferred..=u16::MAX {
            if port == 0 {
                continue;
            }
            if is_port_free(port).await {
                return Ok(port);
            }
        }
        Err(ManagerError::NoPortAvailable { preferred })
    }
}

/// Returns true when a listener can be bound on the loopback port.
pub async fn is_port_free(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_returns_preferred_when_free() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let allocated = PortAllocator::new().allocate(port).await.unwrap();
        assert_eq!(allocated, port);
    }

    #[tokio::test]
    async fn allocate_skips_bound_port() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = held.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }

        let mut expected = port + 1;
        while !is_port_free(expected).await {
            expected += 1;
        }
        let allocated = PortAllocator::new().allocate(port).await.unwrap();
        assert_eq!(allocated, expected);
        drop(held);
    }

    #[tokio::test]
    async fn exhausted_range_is_no_port_available() {
        // Either we hold the last port or something else already does.
        let _held = TcpListener::bind(("127.0.0.1", u16::MAX)).await;
        let err = PortAllocator::new().allocate(u16::MAX).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::NoPortAvailable { preferred: u16::MAX }
        ));
    }
}
