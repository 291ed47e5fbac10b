// UDP transport: one socket per relay side
//
// Datagrams arriving on the insecure-side socket are relayed out of the
// secure-side socket toward the secure peer, and vice versa.

use super::{PacketSink, TransportError};
use crate::config::RetryPolicy;
use crate::relay::{Origin, OutputChannel, PacketEvent, RelayError, RelayHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 65_536;

/// Socket addresses for both relay sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpEndpoints {
    /// Local address receiving traffic from the insecure network
    pub insecure_listen: SocketAddr,
    /// Local address receiving traffic from the secure network
    pub secure_listen: SocketAddr,
    /// Destination for traffic leaving toward the insecure network
    pub insecure_peer: SocketAddr,
    /// Destination for traffic leaving toward the secure network
    pub secure_peer: SocketAddr,
}

impl Default for UdpEndpoints {
    fn default() -> Self {
        Self {
            insecure_listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            secure_listen: SocketAddr::from(([0, 0, 0, 0], 9001)),
            insecure_peer: SocketAddr::from(([127, 0, 0, 1], 9100)),
            secure_peer: SocketAddr::from(([127, 0, 0, 1], 8002)),
        }
    }
}

/// Bind a UDP socket, retrying with bounded exponential backoff
pub async fn bind_with_retry(
    addr: SocketAddr,
    policy: &RetryPolicy,
) -> Result<UdpSocket, TransportError> {
    let mut attempt = 0u32;
    loop {
        match UdpSocket::bind(addr).await {
            Ok(socket) => return Ok(socket),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.delay_for(attempt);
                warn!(%addr, attempt = attempt + 1, ?delay, "Bind failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(TransportError::Bind {
                    addr,
                    attempts: attempt + 1,
                    source,
                })
            }
        }
    }
}

/// Bound sockets for both relay sides
pub struct UdpRelayPorts {
    insecure: Arc<UdpSocket>,
    secure: Arc<UdpSocket>,
    endpoints: UdpEndpoints,
}

impl UdpRelayPorts {
    pub async fn bind(endpoints: UdpEndpoints, policy: &RetryPolicy) -> Result<Self, TransportError> {
        let insecure = bind_with_retry(endpoints.insecure_listen, policy).await?;
        let secure = bind_with_retry(endpoints.secure_listen, policy).await?;
        info!(
            insecure = %endpoints.insecure_listen,
            secure = %endpoints.secure_listen,
            "UDP relay ports bound"
        );
        Ok(Self {
            insecure: Arc::new(insecure),
            secure: Arc::new(secure),
            endpoints,
        })
    }

    /// Actual local addresses (resolves port 0)
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr), TransportError> {
        Ok((self.insecure.local_addr()?, self.secure.local_addr()?))
    }

    pub fn sink(&self) -> UdpSink {
        UdpSink {
            insecure: Arc::clone(&self.insecure),
            secure: Arc::clone(&self.secure),
            insecure_peer: self.endpoints.insecure_peer,
            secure_peer: self.endpoints.secure_peer,
        }
    }

    /// Feed received datagrams into the relay until it stops.
    ///
    /// Returns an error after more than `max_consecutive_failures` receive
    /// errors in a row.
    pub async fn run_ingress(
        &self,
        handle: RelayHandle,
        max_consecutive_failures: u32,
    ) -> Result<(), RelayError> {
        let clock = handle.clock();
        let mut insecure_buf = vec![0u8; MAX_DATAGRAM];
        let mut secure_buf = vec![0u8; MAX_DATAGRAM];
        let mut failures = 0u32;

        loop {
            let (origin, received) = tokio::select! {
                _ = handle.closed() => return Ok(()),
                r = self.insecure.recv_from(&mut insecure_buf) => (Origin::Insecure, r),
                r = self.secure.recv_from(&mut secure_buf) => (Origin::Secure, r),
            };

            let (len, peer) = match received {
                Ok(received) => {
                    failures = 0;
                    received
                }
                Err(e) => {
                    failures += 1;
                    warn!(%origin, failures, "Receive failed: {}", e);
                    if failures > max_consecutive_failures {
                        return Err(TransportError::Io(e).into());
                    }
                    continue;
                }
            };

            let arrived_at = clock.now();
            let buf = match origin {
                Origin::Insecure => &insecure_buf,
                Origin::Secure => &secure_buf,
            };
            debug!(%origin, %peer, len, "Datagram received");

            let event = PacketEvent::new(origin, peer.to_string(), buf[..len].to_vec(), arrived_at);
            match handle.submit_event(event).await {
                Ok(()) => {}
                Err(RelayError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Publishes relayed datagrams out of the opposite-side socket
#[derive(Clone)]
pub struct UdpSink {
    insecure: Arc<UdpSocket>,
    secure: Arc<UdpSocket>,
    insecure_peer: SocketAddr,
    secure_peer: SocketAddr,
}

#[async_trait]
impl PacketSink for UdpSink {
    async fn publish(&self, channel: OutputChannel, payload: Vec<u8>) -> Result<(), TransportError> {
        let (socket, peer) = match channel {
            OutputChannel::ToSecure => (&self.secure, self.secure_peer),
            OutputChannel::ToInsecure => (&self.insecure, self.insecure_peer),
        };
        socket
            .send_to(&payload, peer)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Publish {
                channel,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_bind_gives_up_after_policy_attempts() {
        let taken = UdpSocket::bind(loopback()).await.unwrap();
        let addr = taken.local_addr().unwrap();
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        };

        match bind_with_retry(addr, &policy).await {
            Err(TransportError::Bind { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected bind failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sink_routes_by_channel() {
        let secure_peer = UdpSocket::bind(loopback()).await.unwrap();
        let insecure_peer = UdpSocket::bind(loopback()).await.unwrap();
        let endpoints = UdpEndpoints {
            insecure_listen: loopback(),
            secure_listen: loopback(),
            insecure_peer: insecure_peer.local_addr().unwrap(),
            secure_peer: secure_peer.local_addr().unwrap(),
        };
        let ports = UdpRelayPorts::bind(endpoints, &RetryPolicy::default())
            .await
            .unwrap();
        let (_, secure_local) = ports.local_addrs().unwrap();
        let sink = ports.sink();

        sink.publish(OutputChannel::ToSecure, b"to-secure".to_vec())
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), secure_peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"to-secure");
        assert_eq!(from.port(), secure_local.port());
    }
}
