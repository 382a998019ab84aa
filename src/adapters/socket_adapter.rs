//! Raw SCPI socket adapter
//!
//! Most LXI bench instruments (Rigol DG/DS, Siglent, Keysight) accept plain
//! newline-terminated SCPI on TCP port 5555 without a VISA runtime.

use super::ScpiAdapter;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Appended to every outgoing command.
const LINE_TERMINATOR: &str = "\n";

/// SCPI over a raw TCP socket.
pub struct SocketAdapter {
    resource_name: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl SocketAdapter {
    /// Connect to `host:port`.
    ///
    /// # Errors
    ///
    /// Connection refused, unreachable host, or no connection within `timeout`.
    pub async fn connect(
        resource_name: &str,
        host: &str,
        port: u16,
        timeout_after: Duration,
    ) -> Result<Self> {
        let stream = timeout(timeout_after, TcpStream::connect((host, port)))
            .await
            .map_err(|_| anyhow!("Connect to {}:{} timed out after {:?}", host, port, timeout_after))?
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;

        debug!("Socket resource '{}' connected", resource_name);
        Ok(Self {
            resource_name: resource_name.to_string(),
            timeout: timeout_after,
            stream: Some(BufReader::new(stream)),
        })
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>> {
        let name = &self.resource_name;
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow!("Socket resource '{}' is closed", name))
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        let line = format!("{}{}", command, LINE_TERMINATOR);
        let timeout_after = self.timeout;
        let stream = self.stream()?;
        timeout(timeout_after, stream.get_mut().write_all(line.as_bytes()))
            .await
            .map_err(|_| anyhow!("Write timed out after {:?}", timeout_after))?
            .context("Socket write failed")?;
        Ok(())
    }
}

#[async_trait]
impl ScpiAdapter for SocketAdapter {
    async fn write(&mut self, command: &str) -> Result<()> {
        self.send(command).await?;
        debug!("Socket write sent: {}", command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.send(command).await?;

        let timeout_after = self.timeout;
        let stream = self.stream()?;
        let mut line = String::new();
        let read = timeout(timeout_after, stream.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("No reply within {:?}", timeout_after))?
            .context("Socket read failed")?;
        if read == 0 {
            bail!("Connection closed by instrument");
        }

        let response = line.trim().to_string();
        debug!("Socket query '{}' -> '{}'", command, response);
        Ok(response)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .get_mut()
                .shutdown()
                .await
                .context("Socket shutdown failed")?;
            debug!("Socket resource '{}' closed", self.resource_name);
        }
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource_name
    }
}
