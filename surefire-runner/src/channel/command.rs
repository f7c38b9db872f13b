// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Commands sent by the parent to a forked process.

use super::escape::{escape, unescape_field};
use crate::errors::{ChannelDecodeError, CommandEncodeError};
use serde::Deserialize;
use std::{
    fmt,
    io::{self, BufRead, Write},
    str::FromStr,
};
use tracing::debug;

/// The kind of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MasterProcessCommand {
    /// Run the test class named in the payload.
    RunClass,

    /// No more classes will be sent.
    TestSetFinished,

    /// Skip every test that hasn't started yet.
    SkipSinceNextTest,

    /// Stop according to the shutdown policy in the payload.
    Shutdown,

    /// Keep-alive ping.
    Noop,

    /// Acknowledges the fork's goodbye.
    ByeAck,
}

impl MasterProcessCommand {
    /// All commands.
    pub const ALL: &'static [Self] = &[
        Self::RunClass,
        Self::TestSetFinished,
        Self::SkipSinceNextTest,
        Self::Shutdown,
        Self::Noop,
        Self::ByeAck,
    ];

    /// The code written on the wire.
    pub fn code(self) -> &'static str {
        match self {
            Self::RunClass => "RUN_CLASS",
            Self::TestSetFinished => "TEST_SET_FINISHED",
            Self::SkipSinceNextTest => "SKIP_SINCE_NEXT_TEST",
            Self::Shutdown => "SHUTDOWN",
            Self::Noop => "NOOP",
            Self::ByeAck => "BYE_ACK",
        }
    }

    /// The older lowercase opcode, still accepted when decoding.
    pub fn legacy_opcode(self) -> &'static str {
        match self {
            Self::RunClass => "run-testclass",
            Self::TestSetFinished => "testset-finished",
            Self::SkipSinceNextTest => "skip-since-next-test",
            Self::Shutdown => "shutdown",
            Self::Noop => "noop",
            Self::ByeAck => "bye-ack",
        }
    }

    /// Looks a command up by wire code or legacy opcode.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|command| command.code() == code || command.legacy_opcode() == code)
    }

    /// Whether the command carries a payload.
    pub fn has_data(self) -> bool {
        matches!(self, Self::RunClass | Self::Shutdown)
    }
}

impl fmt::Display for MasterProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What a forked process does when asked to shut down, or when its parent goes away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shutdown {
    /// Stop handing out test classes and let the current one finish.
    #[default]
    Default,

    /// Exit the process after flushing.
    Exit,

    /// Abort the process immediately.
    Kill,
}

impl Shutdown {
    /// The name of this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Exit => "exit",
            Self::Kill => "kill",
        }
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shutdown {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "exit" => Ok(Self::Exit),
            "kill" => Ok(Self::Kill),
            other => Err(format!(
                "unknown shutdown policy `{other}` (expected default, exit or kill)"
            )),
        }
    }
}

/// A single command with its optional payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Command {
    kind: MasterProcessCommand,
    data: Option<String>,
}

impl Command {
    /// The `TEST_SET_FINISHED` command.
    pub const TEST_SET_FINISHED: Self = Self::bare(MasterProcessCommand::TestSetFinished);

    /// The `SKIP_SINCE_NEXT_TEST` command.
    pub const SKIP_SINCE_NEXT_TEST: Self = Self::bare(MasterProcessCommand::SkipSinceNextTest);

    /// The `NOOP` command.
    pub const NOOP: Self = Self::bare(MasterProcessCommand::Noop);

    /// The `BYE_ACK` command.
    pub const BYE_ACK: Self = Self::bare(MasterProcessCommand::ByeAck);

    const fn bare(kind: MasterProcessCommand) -> Self {
        Self { kind, data: None }
    }

    /// Creates a command, checking that the payload matches the kind.
    pub fn new(
        kind: MasterProcessCommand,
        data: Option<String>,
    ) -> Result<Self, CommandEncodeError> {
        if kind.has_data() != data.is_some() {
            return Err(CommandEncodeError {
                command: kind,
                expects_data: kind.has_data(),
            });
        }
        Ok(Self { kind, data })
    }

    /// A `RUN_CLASS` command for `class_name`.
    pub fn run_class(class_name: impl Into<String>) -> Self {
        Self {
            kind: MasterProcessCommand::RunClass,
            data: Some(class_name.into()),
        }
    }

    /// A `SHUTDOWN` command carrying `policy`.
    pub fn shutdown(policy: Shutdown) -> Self {
        Self {
            kind: MasterProcessCommand::Shutdown,
            data: Some(policy.as_str().to_owned()),
        }
    }

    /// The kind of this command.
    pub fn kind(&self) -> MasterProcessCommand {
        self.kind
    }

    /// The payload.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// The shutdown policy of a `SHUTDOWN` command. Unknown policies read as the default.
    pub fn to_shutdown(&self) -> Option<Shutdown> {
        (self.kind == MasterProcessCommand::Shutdown).then(|| {
            self.data
                .as_deref()
                .and_then(|data| data.parse().ok())
                .unwrap_or_default()
        })
    }

    /// Encodes the command as one record, including the trailing newline.
    pub fn to_line(&self) -> String {
        let payload = self.data.as_deref().map(escape).unwrap_or_default();
        format!("{},0,{payload}\n", self.kind.code())
    }

    /// Parses one record, without its trailing newline.
    ///
    /// Returns `None` for anything that isn't a well-formed command, so that a reader can skip
    /// over corrupted input.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut parts = line.splitn(3, ',');
        let kind = MasterProcessCommand::from_code(parts.next()?.trim())?;
        let id = parts.next().map(str::trim).unwrap_or("0");
        if u32::from_str_radix(id, 16).is_err() {
            return None;
        }
        let payload = parts.next().unwrap_or_default();

        match kind {
            MasterProcessCommand::RunClass => {
                let class_name = unescape_field(payload)?;
                (!class_name.trim().is_empty()).then(|| Self::run_class(class_name))
            }
            MasterProcessCommand::Shutdown => {
                let policy = unescape_field(payload)
                    .and_then(|data| data.parse().ok())
                    .unwrap_or_default();
                Some(Self::shutdown(policy))
            }
            other => Some(Self::bare(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{} {data}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Reads commands from a byte stream.
#[derive(Debug)]
pub struct CommandDecoder<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> CommandDecoder<R> {
    /// Creates a decoder over `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` for a record that isn't a command. End of stream and a record cut off
    /// by a closed channel are returned as errors.
    pub fn decode(&mut self) -> Result<Option<Command>, ChannelDecodeError> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(ChannelDecodeError::from_io)?;
        if read == 0 {
            return Err(ChannelDecodeError::EndOfStream);
        }
        if self.buf.last() != Some(&b'\n') {
            return Err(ChannelDecodeError::Closed);
        }

        let Ok(line) = std::str::from_utf8(&self.buf) else {
            debug!("skipping command record that is not UTF-8");
            return Ok(None);
        };
        let command = Command::parse_line(line);
        if command.is_none() {
            debug!(record = line.trim_end(), "skipping unrecognized command record");
        }
        Ok(command)
    }
}

/// Writes commands to a byte stream, flushing after each.
#[derive(Debug)]
pub struct CommandEncoder<W> {
    writer: W,
}

impl<W: Write> CommandEncoder<W> {
    /// Creates an encoder over `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one command.
    pub fn encode(&mut self, command: &Command) -> io::Result<()> {
        self.writer.write_all(command.to_line().as_bytes())?;
        self.writer.flush()
    }
}
