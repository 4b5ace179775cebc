//! TCP / TLS transport speaking RESP

use super::{Connection, Connector};
use crate::cluster::NodeAddress;
use crate::config::{ClientConfig, TlsConfig};
use crate::error::{GlideError, Result};
use crate::protocol::{Cmd, Value, codec};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default connector: plain TCP or TLS sockets
pub struct TcpConnector {
    connect_timeout: Duration,
    tls: Option<tokio_native_tls::TlsConnector>,
}

impl TcpConnector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls = if config.use_tls {
            Some(build_tls_connector(&config.advanced_config.tls_config)?)
        } else {
            None
        };
        Ok(Self {
            connect_timeout: config.connection_timeout(),
            tls,
        })
    }
}

fn build_tls_connector(tls_config: &TlsConfig) -> Result<tokio_native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if tls_config.insecure {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    if let Some(ref ca_path) = tls_config.root_cert_path {
        let ca_data = std::fs::read(ca_path).map_err(|e| {
            GlideError::Config(format!(
                "failed to read root certificate {}: {}",
                ca_path.display(),
                e
            ))
        })?;
        let cert = native_tls::Certificate::from_pem(&ca_data)
            .map_err(|e| GlideError::Config(format!("invalid root certificate: {}", e)))?;
        builder.add_root_certificate(cert);
    }

    let connector = builder
        .build()
        .map_err(|e| GlideError::Config(format!("failed to build TLS connector: {}", e)))?;
    Ok(tokio_native_tls::TlsConnector::from(connector))
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &NodeAddress) -> Result<Box<dyn Connection>> {
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| GlideError::Timeout {
                address: address.clone(),
            })?
            .map_err(|e| GlideError::connection(address, e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| GlideError::connection(address, e.to_string()))?;

        match &self.tls {
            None => {
                debug!(address = %address, "TCP connection established");
                Ok(Box::new(RespConnection::new(stream, address.clone())))
            }
            Some(tls) => {
                let handshake = tls.connect(&address.host, stream);
                let stream = tokio::time::timeout(self.connect_timeout, handshake)
                    .await
                    .map_err(|_| GlideError::Timeout {
                        address: address.clone(),
                    })?
                    .map_err(|e| GlideError::connection(address, format!("TLS: {}", e)))?;
                debug!(address = %address, "TLS connection established");
                Ok(Box::new(RespConnection::new(stream, address.clone())))
            }
        }
    }
}

/// One socket, one outstanding request at a time
pub struct RespConnection<S> {
    stream: S,
    address: NodeAddress,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> RespConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, address: NodeAddress) -> Self {
        Self {
            stream,
            address,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_buf: BytesMut::new(),
        }
    }

    async fn read_reply(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = codec::decode(&mut self.read_buf)? {
                return Ok(value);
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| GlideError::connection(&self.address, e.to_string()))?;
            if n == 0 {
                return Err(GlideError::connection(
                    &self.address,
                    "connection closed by peer",
                ));
            }
        }
    }
}

#[async_trait]
impl<S> Connection for RespConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn request(&mut self, cmd: &Cmd) -> Result<Value> {
        self.write_buf.clear();
        cmd.encode(&mut self.write_buf);
        self.stream
            .write_all(&self.write_buf)
            .await
            .map_err(|e| GlideError::connection(&self.address, e.to_string()))?;
        self.read_reply().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd;

    #[tokio::test]
    async fn test_request_over_duplex() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut conn = RespConnection::new(client, NodeAddress::new("mem", 1));

        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
            // reply split across two writes
            server.write_all(b"$5\r\nhel").await.unwrap();
            server.write_all(b"lo\r\n").await.unwrap();
            server
        });

        let reply = conn.request(&cmd("GET").arg("k")).await.unwrap();
        assert_eq!(reply, Value::BulkString(b"hello".to_vec()));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_replies_stay_in_request_order() {
        let stream = tokio_test::io::Builder::new()
            .write(b"*1\r\n$4\r\nPING\r\n")
            .read(b"+PONG\r\n")
            .write(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .read(b"-ERR boom\r\n")
            .build();
        let mut conn = RespConnection::new(stream, NodeAddress::new("mem", 1));

        let pong = conn.request(&cmd("PING")).await.unwrap();
        assert_eq!(pong, Value::Status("PONG".to_string()));
        let err = conn.request(&cmd("GET").arg("k")).await.unwrap();
        assert_eq!(err, Value::Error("ERR boom".to_string()));
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut conn = RespConnection::new(client, NodeAddress::new("mem", 1));
        let err = conn.request(&cmd("PING")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
