//! VISA adapter for USB/GPIB/LXI instruments
//!
//! Wraps the visa-rs crate. VISA calls are blocking, so every operation runs on
//! Tokio's blocking pool with the session moved in and out of a mutex.
//!
//! Supports resource strings like:
//! - "USB0::0x1AB1::0x0642::DG1ZA200500518::INSTR" (USB-TMC)
//! - "TCPIP0::192.168.1.100::INSTR" (LXI/VXI-11)
//! - "GPIB0::5::INSTR" (GPIB)

use super::ScpiAdapter;
use crate::error::AppResult;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

#[cfg(not(feature = "instrument_visa"))]
use crate::error::BodeError;

/// Appended to every outgoing command.
#[cfg(feature = "instrument_visa")]
const LINE_TERMINATOR: &str = "\n";

/// An open VISA session.
///
/// The resource manager is kept alive alongside the instrument: closing the
/// manager closes every session it opened.
#[cfg(feature = "instrument_visa")]
struct VisaSession {
    _rm: DefaultRM,
    instrument: Instrument,
}

/// VISA adapter for instrument communication
pub struct VisaAdapter {
    /// VISA resource string (e.g., "USB0::0x1AB1::0x04CE::DS1ZA194017266::INSTR")
    pub(crate) resource_string: String,

    #[cfg(feature = "instrument_visa")]
    session: Option<Arc<Mutex<VisaSession>>>,
}

impl VisaAdapter {
    /// Open a VISA resource.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` if the resource manager or the resource cannot be
    /// opened.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(resource_string: &str, timeout: Duration) -> AppResult<Self> {
        let resource = resource_string.to_string();
        let session = tokio::task::spawn_blocking(move || -> Result<VisaSession> {
            let rm = DefaultRM::new()
                .map_err(|e| anyhow!("Failed to create VISA resource manager: {:?}", e))?;
            let name = std::ffi::CString::new(resource.clone())
                .context("Resource string contains a NUL byte")?;
            let instrument = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open VISA resource {}: {:?}", resource, e))?;
            Ok(VisaSession {
                _rm: rm,
                instrument,
            })
        })
        .await
        .map_err(|e| anyhow!("VISA open task panicked: {}", e))
        .and_then(|inner| inner)
        .map_err(|e| crate::error::BodeError::instrument(resource_string, "open", e))?;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            resource_string,
            timeout.as_millis()
        );
        Ok(Self {
            resource_string: resource_string.to_string(),
            session: Some(Arc::new(Mutex::new(session))),
        })
    }

    /// VISA support is compiled out.
    ///
    /// # Errors
    ///
    /// Always `FeatureNotEnabled`.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(_resource_string: &str, _timeout: Duration) -> AppResult<Self> {
        Err(BodeError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    #[cfg(feature = "instrument_visa")]
    async fn transfer(&self, command: &str, expect_reply: bool) -> Result<String> {
        use std::io::{BufRead, BufReader, Write};

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("VISA instrument not connected"))?
            .clone();
        let line = format!("{}{}", command, LINE_TERMINATOR);
        let command_for_log = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("VISA session mutex poisoned"))?;
            guard
                .instrument
                .write_all(line.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command_for_log))?;
            if !expect_reply {
                return Ok(String::new());
            }
            let mut response = String::new();
            BufReader::new(&guard.instrument)
                .read_line(&mut response)
                .with_context(|| format!("VISA read failed for: {}", command_for_log))?;
            Ok(response.trim().to_string())
        })
        .await
        .context("VISA I/O task panicked")?
    }
}

#[async_trait]
impl ScpiAdapter for VisaAdapter {
    #[cfg(feature = "instrument_visa")]
    async fn write(&mut self, command: &str) -> Result<()> {
        self.transfer(command, false).await?;
        debug!("VISA write sent: {}", command);
        Ok(())
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn write(&mut self, _command: &str) -> Result<()> {
        anyhow::bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    #[cfg(feature = "instrument_visa")]
    async fn query(&mut self, command: &str) -> Result<String> {
        let response = self.transfer(command, true).await?;
        debug!("VISA query '{}' -> '{}'", command, response);
        Ok(response)
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn query(&mut self, _command: &str) -> Result<String> {
        anyhow::bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    async fn close(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.session.take().is_some() {
                debug!("VISA resource '{}' closed", self.resource_string);
            }
        }
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource_string
    }
}

/// List resources matching `?*INSTR`.
#[cfg(feature = "instrument_visa")]
pub(crate) async fn discover() -> AppResult<Vec<String>> {
    tokio::task::spawn_blocking(|| -> Result<Vec<String>> {
        let rm = DefaultRM::new()
            .map_err(|e| anyhow!("Failed to create VISA resource manager: {:?}", e))?;
        let expr = std::ffi::CString::new("?*INSTR").context("Invalid search expression")?;
        let mut list = rm
            .find_res_list(&expr.into())
            .map_err(|e| anyhow!("VISA resource search failed: {:?}", e))?;
        let mut resources = Vec::new();
        while let Some(name) = list
            .find_next()
            .map_err(|e| anyhow!("VISA resource search failed: {:?}", e))?
        {
            resources.push(name.to_string());
        }
        Ok(resources)
    })
    .await
    .map_err(|e| anyhow!("VISA discovery task panicked: {}", e))
    .and_then(|inner| inner)
    .map_err(|e| crate::error::BodeError::instrument("visa", "find_res_list ?*INSTR", e))
}

#[cfg(not(feature = "instrument_visa"))]
pub(crate) async fn discover() -> AppResult<Vec<String>> {
    Err(BodeError::FeatureNotEnabled("instrument_visa".to_string()))
}
