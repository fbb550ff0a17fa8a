use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use super::PushTransport;

const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpPushTransport {
    socket: UdpSocket,
}

impl UdpPushTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!("push socket bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl PushTransport for UdpPushTransport {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<()> {
        self.socket.send_to(payload, target).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }
}
