//! Simulated bench for testing and dry runs
//!
//! [`SimulatedBench`] models a signal generator feeding a first-order RC
//! low-pass into a four-channel scope. It hands out one adapter per instrument;
//! both share the bench state so a frequency written to the generator shows up
//! in the scope's measurements. It provides:
//! - A call log across both instruments, in issue order
//! - Injectable faults (bad replies, transport failures) on matching commands
//! - Read-back of the last frequency, timebase and vertical scales

use super::ScpiAdapter;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which instrument an adapter plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimRole {
    /// Signal generator
    Generator,
    /// Oscilloscope
    Scope,
}

impl SimRole {
    fn label(self) -> &'static str {
        match self {
            SimRole::Generator => "generator",
            SimRole::Scope => "scope",
        }
    }
}

#[derive(Debug, Clone)]
enum FaultKind {
    Reply(String),
    Transport(String),
}

#[derive(Debug, Clone)]
struct PendingFault {
    role: SimRole,
    pattern: String,
    skip: usize,
    kind: FaultKind,
}

#[derive(Debug)]
struct BenchState {
    corner_hz: f64,
    source_vrms: f64,
    vin_channel: u8,
    vout_channel: u8,
    frequency_hz: f64,
    timebase_secs: Option<f64>,
    channel_scales: [f64; 4],
    beeps: usize,
    call_log: Vec<String>,
    faults: Vec<PendingFault>,
}

impl BenchState {
    fn attenuation(&self) -> f64 {
        let ratio = self.frequency_hz / self.corner_hz;
        1.0 / (1.0 + ratio * ratio).sqrt()
    }

    fn phase_deg(&self) -> f64 {
        -(self.frequency_hz / self.corner_hz).atan().to_degrees()
    }

    fn vrms(&self, channel: u8) -> f64 {
        if channel == self.vin_channel {
            self.source_vrms
        } else if channel == self.vout_channel {
            self.source_vrms * self.attenuation()
        } else {
            0.0
        }
    }

    /// Pop the first fault matching this command, honouring skip counts.
    fn take_fault(&mut self, role: SimRole, command: &str) -> Option<FaultKind> {
        let index = self
            .faults
            .iter()
            .position(|f| f.role == role && command.contains(&f.pattern))?;
        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return None;
        }
        Some(self.faults.remove(index).kind)
    }
}

/// Shared simulated bench.
///
/// # Example
///
/// ```
/// use bode_sweep::adapters::SimulatedBench;
///
/// let bench = SimulatedBench::new().with_corner_frequency(1_000.0);
/// let generator = bench.generator();
/// let scope = bench.scope();
/// # drop((generator, scope));
/// assert!(bench.call_log().is_empty());
/// ```
#[derive(Clone)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBench {
    /// 1 kHz corner, 1 Vrms source, Vin on CH1, Vout on CH3.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BenchState {
                corner_hz: 1_000.0,
                source_vrms: 1.0,
                vin_channel: 1,
                vout_channel: 3,
                frequency_hz: 1_000.0,
                timebase_secs: None,
                channel_scales: [1.0; 4],
                beeps: 0,
                call_log: Vec::new(),
                faults: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the DUT's -3 dB frequency
    pub fn with_corner_frequency(self, hz: f64) -> Self {
        self.state().corner_hz = hz;
        self
    }

    /// Set the generator output level in Vrms
    pub fn with_source_amplitude(self, vrms: f64) -> Self {
        self.state().source_vrms = vrms;
        self
    }

    /// Set which scope channels probe the DUT input and output
    pub fn with_channels(self, vin: u8, vout: u8) -> Self {
        {
            let mut state = self.state();
            state.vin_channel = vin;
            state.vout_channel = vout;
        }
        self
    }

    /// Adapter playing the signal generator.
    pub fn generator(&self) -> SimAdapter {
        SimAdapter::new(self.clone(), SimRole::Generator)
    }

    /// Adapter playing the oscilloscope.
    pub fn scope(&self) -> SimAdapter {
        SimAdapter::new(self.clone(), SimRole::Scope)
    }

    /// Answer the `skip`+1-th query on `role` containing `pattern` with `reply`.
    pub fn inject_reply(&self, role: SimRole, pattern: &str, skip: usize, reply: &str) {
        self.state().faults.push(PendingFault {
            role,
            pattern: pattern.to_string(),
            skip,
            kind: FaultKind::Reply(reply.to_string()),
        });
    }

    /// Fail the `skip`+1-th command or query on `role` containing `pattern`.
    pub fn inject_failure(&self, role: SimRole, pattern: &str, skip: usize, message: &str) {
        self.state().faults.push(PendingFault {
            role,
            pattern: pattern.to_string(),
            skip,
            kind: FaultKind::Transport(message.to_string()),
        });
    }

    /// Every command and query so far, as `"<role>: <command>"`.
    pub fn call_log(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.state().call_log.clear();
    }

    /// Last frequency written to the generator.
    pub fn frequency(&self) -> f64 {
        self.state().frequency_hz
    }

    /// Last timebase written to the scope, if any.
    pub fn timebase(&self) -> Option<f64> {
        self.state().timebase_secs
    }

    /// Current vertical scale of a scope channel (1-4).
    pub fn channel_scale(&self, channel: u8) -> Option<f64> {
        let index = usize::from(channel).checked_sub(1)?;
        self.state().channel_scales.get(index).copied()
    }

    /// Number of beep commands received by the generator.
    pub fn beeps(&self) -> usize {
        self.state().beeps
    }

    fn handle(&self, role: SimRole, command: &str, is_query: bool) -> Result<String> {
        let mut state = self.state();
        state.call_log.push(format!("{}: {}", role.label(), command));

        match state.take_fault(role, command) {
            Some(FaultKind::Transport(message)) => bail!("{}", message),
            Some(FaultKind::Reply(reply)) if is_query => return Ok(reply),
            _ => {}
        }

        match role {
            SimRole::Generator => handle_generator(&mut state, command, is_query),
            SimRole::Scope => handle_scope(&mut state, command, is_query),
        }
    }
}

fn parse_channel(token: &str) -> Result<u8> {
    let digits = token
        .trim()
        .trim_start_matches(':')
        .trim_start_matches("CHAN")
        .trim_start_matches("SOUR");
    digits
        .parse::<u8>()
        .map_err(|_| anyhow!("Bad channel token '{}'", token))
}

fn parse_argument(command: &str) -> Result<f64> {
    let value = command
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("Missing argument in '{}'", command))?;
    value
        .parse::<f64>()
        .map_err(|_| anyhow!("Bad numeric argument in '{}'", command))
}

fn handle_generator(state: &mut BenchState, command: &str, is_query: bool) -> Result<String> {
    let header = command.split_whitespace().next().unwrap_or_default();
    if is_query {
        return match header {
            "*IDN?" => Ok("SIM,Generator,SIM0001,1.0".to_string()),
            _ => bail!("Unsupported generator query '{}'", command),
        };
    }

    if header.starts_with(":SOUR") && header.ends_with(":FREQ") {
        state.frequency_hz = parse_argument(command)?;
    } else if header == ":SYST:BEEP:IMM" {
        state.beeps += 1;
    }
    Ok(String::new())
}

fn handle_scope(state: &mut BenchState, command: &str, is_query: bool) -> Result<String> {
    let mut words = command.split_whitespace();
    let header = words.next().unwrap_or_default();

    if is_query {
        if header == "*IDN?" {
            return Ok("SIM,Scope,SIM0002,1.0".to_string());
        }
        if header == ":MEAS:ITEM?" {
            let args: Vec<&str> = words.next().unwrap_or_default().split(',').collect();
            return match args.as_slice() {
                ["VRMS", channel] => {
                    let channel = parse_channel(channel)?;
                    Ok(format!("{:.6e}", state.vrms(channel)))
                }
                ["RPH", a, b] => {
                    let (a, b) = (parse_channel(a)?, parse_channel(b)?);
                    let phase = if a == state.vout_channel && b == state.vin_channel {
                        state.phase_deg()
                    } else if a == state.vin_channel && b == state.vout_channel {
                        -state.phase_deg()
                    } else {
                        0.0
                    };
                    Ok(format!("{:.6e}", phase))
                }
                _ => bail!("Unsupported measurement '{}'", command),
            };
        }
        if header.starts_with(":CHAN") && header.ends_with(":SCAL?") {
            let channel = parse_channel(header.trim_end_matches(":SCAL?"))?;
            let scale = usize::from(channel)
                .checked_sub(1)
                .and_then(|i| state.channel_scales.get(i).copied())
                .ok_or_else(|| anyhow!("No such channel {}", channel))?;
            return Ok(format!("{:.6e}", scale));
        }
        bail!("Unsupported scope query '{}'", command);
    }

    if header == ":TIM:MAIN:SCAL" {
        state.timebase_secs = Some(parse_argument(command)?);
    } else if header.starts_with(":CHAN") && header.ends_with(":SCAL") {
        let channel = parse_channel(header.trim_end_matches(":SCAL"))?;
        let value = parse_argument(command)?;
        let slot = usize::from(channel)
            .checked_sub(1)
            .and_then(|i| state.channel_scales.get_mut(i))
            .ok_or_else(|| anyhow!("No such channel {}", channel))?;
        *slot = value;
    }
    Ok(String::new())
}

/// One instrument's view of a [`SimulatedBench`].
pub struct SimAdapter {
    bench: SimulatedBench,
    role: SimRole,
    resource_name: String,
    open: bool,
}

impl SimAdapter {
    fn new(bench: SimulatedBench, role: SimRole) -> Self {
        Self {
            bench,
            role,
            resource_name: format!("SIM::{}", role.label().to_uppercase()),
            open: true,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            bail!("Simulated {} is closed", self.role.label())
        }
    }
}

#[async_trait]
impl ScpiAdapter for SimAdapter {
    async fn write(&mut self, command: &str) -> Result<()> {
        self.ensure_open()?;
        self.bench.handle(self.role, command, false).map(|_| ())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.ensure_open()?;
        self.bench.handle(self.role, command, true)
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn resource_name(&self) -> &str {
        &self.resource_name
    }
}
