//! Instrument command/query adapters
//!
//! An adapter owns one connection to one instrument and moves ASCII SCPI
//! strings across it. The controllers in [`crate::instrument`] are the only
//! callers; each owns its adapter exclusively.
//!
//! Resource strings select the implementation:
//! - `TCPIP0::192.168.1.50::5555::SOCKET` or `192.168.1.50:5555` - raw SCPI socket
//! - anything else, e.g. `USB0::0x1AB1::0x04CE::DS1ZA194017266::INSTR` - VISA
//!   (requires the `instrument_visa` feature)

pub mod sim_adapter;
pub mod socket_adapter;
pub mod visa_adapter;

pub use sim_adapter::{SimAdapter, SimulatedBench};
pub use socket_adapter::SocketAdapter;
pub use visa_adapter::VisaAdapter;

use crate::error::AppResult;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// ASCII command/query transport to a single instrument.
///
/// Commands are sent without terminator; implementations append their own.
/// Replies are returned trimmed. Timeouts are enforced by the implementation
/// and surface as errors. Nothing here retries.
#[async_trait]
pub trait ScpiAdapter: Send {
    /// Send a command, no reply expected.
    async fn write(&mut self, command: &str) -> Result<()>;

    /// Send a query and read one reply line.
    async fn query(&mut self, command: &str) -> Result<String>;

    /// Release the connection. Further calls fail.
    async fn close(&mut self) -> Result<()>;

    /// Resource string this adapter was opened with.
    fn resource_name(&self) -> &str;
}

/// How a resource string will be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// Raw SCPI over TCP
    Socket {
        /// Host name or address
        host: String,
        /// TCP port, 5555 on most LXI instruments
        port: u16,
    },
    /// Anything handed to the VISA resource manager
    Visa(String),
}

impl ResourceKind {
    /// Classify a resource string.
    pub fn parse(resource: &str) -> Self {
        let resource = resource.trim();
        let parts: Vec<&str> = resource.split("::").collect();
        if parts.len() == 4
            && parts[0].to_ascii_uppercase().starts_with("TCPIP")
            && parts[3].eq_ignore_ascii_case("SOCKET")
        {
            if let Ok(port) = parts[2].parse::<u16>() {
                return Self::Socket {
                    host: parts[1].to_string(),
                    port,
                };
            }
        }

        if !resource.contains("::") {
            if let Some((host, port)) = resource.rsplit_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    if !host.is_empty() {
                        return Self::Socket {
                            host: host.to_string(),
                            port,
                        };
                    }
                }
            }
        }

        Self::Visa(resource.to_string())
    }
}

/// Open the instrument behind `resource`.
///
/// # Errors
///
/// `InstrumentCommand` if the connection cannot be established,
/// `FeatureNotEnabled` for VISA resources in builds without `instrument_visa`.
pub async fn open(resource: &str, timeout: Duration) -> AppResult<Box<dyn ScpiAdapter>> {
    match ResourceKind::parse(resource) {
        ResourceKind::Socket { host, port } => {
            let adapter = SocketAdapter::connect(resource, &host, port, timeout)
                .await
                .map_err(|e| crate::error::BodeError::instrument(resource, "open", e))?;
            info!("Opened socket resource '{}'", resource);
            Ok(Box::new(adapter))
        }
        ResourceKind::Visa(name) => {
            let adapter = VisaAdapter::open(&name, timeout).await?;
            info!("Opened VISA resource '{}'", name);
            Ok(Box::new(adapter))
        }
    }
}

/// List instrument resources visible to the VISA resource manager.
///
/// # Errors
///
/// `FeatureNotEnabled` in builds without `instrument_visa`.
pub async fn discover() -> AppResult<Vec<String>> {
    visa_adapter::discover().await
}
