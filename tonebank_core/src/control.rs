//! Control requests that reach the wave table from outside the audio path.
//!
//! Two request shapes are understood. `ControlRequest` mirrors a device ioctl:
//! a magic byte, a command number and one 32-bit argument. The line protocol
//! is what an interactive control tool sends: `a <amp> <phase> <freq>`,
//! `r <freq>`, `l` and `q`.

use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{SynthError, SynthResult};
use crate::table::{RemoveOutcome, WaveTable};
use crate::wave::Wave;

/// Magic byte every raw request must carry.
pub const CONTROL_MAGIC: u8 = b's';
/// Command number for "add oscillator"; the argument is a packed `Wave`.
pub const CMD_ADD_WAVE: u8 = 0;
/// Command number for "remove by frequency"; the argument is the frequency key.
pub const CMD_REMOVE_WAVE: u8 = 1;

/// Raw request as delivered by a device-style transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub magic: u8,
    pub number: u8,
    pub arg: u32,
}

impl ControlRequest {
    pub fn add(wave: Wave) -> Self {
        Self {
            magic: CONTROL_MAGIC,
            number: CMD_ADD_WAVE,
            arg: wave.bits(),
        }
    }

    pub fn remove(frequency: u32) -> Self {
        Self {
            magic: CONTROL_MAGIC,
            number: CMD_REMOVE_WAVE,
            arg: frequency,
        }
    }
}

/// A decoded table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    AddWave(Wave),
    /// Frequency key. Keys above `u16::MAX` can never match a stored wave.
    RemoveWave(u32),
}

impl TryFrom<ControlRequest> for ControlCommand {
    type Error = SynthError;

    fn try_from(request: ControlRequest) -> SynthResult<Self> {
        if request.magic != CONTROL_MAGIC {
            return Err(SynthError::InvalidCommand(format!(
                "bad magic {:#04x}, expected {:#04x}",
                request.magic, CONTROL_MAGIC
            )));
        }

        match request.number {
            CMD_ADD_WAVE => Ok(Self::AddWave(Wave::from_bits(request.arg))),
            CMD_REMOVE_WAVE => Ok(Self::RemoveWave(request.arg)),
            other => Err(SynthError::InvalidCommand(format!(
                "no such command number {other}"
            ))),
        }
    }
}

/// What a successfully applied command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Added { count: usize },
    Removed(RemoveOutcome),
}

/// One line of the interactive control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCommand {
    Apply(ControlCommand),
    List,
    Quit,
}

impl FromStr for LineCommand {
    type Err = SynthError;

    fn from_str(line: &str) -> SynthResult<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(SynthError::InvalidCommand("empty line".into()));
        };
        let args = words.map(parse_number).collect::<SynthResult<Vec<u32>>>()?;

        match (verb, args.as_slice()) {
            ("a", &[amplitude, phase, frequency]) => Ok(Self::Apply(ControlCommand::AddWave(
                Wave::encode(amplitude, phase, frequency),
            ))),
            ("r", &[frequency]) => Ok(Self::Apply(ControlCommand::RemoveWave(frequency))),
            ("l", []) => Ok(Self::List),
            ("q", []) => Ok(Self::Quit),
            ("a", _) => Err(SynthError::InvalidCommand(
                "usage: a <amp> <phase> <freq>".into(),
            )),
            ("r", _) => Err(SynthError::InvalidCommand("usage: r <freq>".into())),
            _ => Err(SynthError::InvalidCommand(format!("unknown command `{line}`"))),
        }
    }
}

fn parse_number(word: &str) -> SynthResult<u32> {
    word.parse()
        .map_err(|_| SynthError::InvalidCommand(format!("`{word}` is not a number")))
}

/// Apply one command to `table`.
pub fn apply(table: &WaveTable, command: ControlCommand) -> SynthResult<ControlReply> {
    match command {
        ControlCommand::AddWave(wave) => {
            debug!(bits = wave.bits(), %wave, "add wave request");
            let count = table.add(wave)?;
            Ok(ControlReply::Added { count })
        }
        ControlCommand::RemoveWave(frequency) => {
            debug!(frequency, "remove wave request");
            match u16::try_from(frequency) {
                Ok(key) => Ok(ControlReply::Removed(table.remove_by_frequency(key)?)),
                Err(_) => Ok(ControlReply::Removed(RemoveOutcome {
                    removed: 0,
                    remaining: table.len(),
                })),
            }
        }
    }
}

/// Decode and apply a raw request. Invalid requests leave the table untouched.
pub fn dispatch(table: &WaveTable, request: ControlRequest) -> SynthResult<ControlReply> {
    let command = ControlCommand::try_from(request).inspect_err(|err| {
        warn!(magic = request.magic, number = request.number, %err, "rejected control request");
    })?;
    apply(table, command)
}
