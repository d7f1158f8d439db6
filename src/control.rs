//! Operator commands accepted on the control channel (stdin in the CLI).

use crate::aggregator::Aggregator;
use crate::error::{AppResult, DaqError};
use std::str::FromStr;

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Begin recording a test.
    Start,
    /// Stop recording.
    Stop,
    /// Restart the test time base.
    Reset,
    /// Change the reporting interval, seconds.
    Interval(u32),
    /// Select thermocouple channels for charting (0-based).
    Channels(Vec<usize>),
    /// Print the current status.
    Status,
    /// Exit the program.
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = DaqError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| DaqError::Configuration("empty command".to_string()))?
            .to_lowercase();
        let arg = words.next();
        if words.next().is_some() {
            return Err(DaqError::Configuration(format!(
                "too many arguments: '{}'",
                line.trim()
            )));
        }

        let command = match (verb.as_str(), arg) {
            ("start", None) => Self::Start,
            ("stop", None) => Self::Stop,
            ("reset", None) => Self::Reset,
            ("status", None) => Self::Status,
            ("quit" | "exit", None) => Self::Quit,
            ("interval", Some(seconds)) => Self::Interval(seconds.parse().map_err(|_| {
                DaqError::Configuration(format!("interval must be a number, got '{}'", seconds))
            })?),
            ("channels", Some(list)) => Self::Channels(parse_channel_list(list)?),
            _ => {
                return Err(DaqError::Configuration(format!(
                    "unknown command '{}' (start, stop, reset, interval N, channels a,b, status, quit)",
                    line.trim()
                )))
            }
        };
        Ok(command)
    }
}

fn parse_channel_list(list: &str) -> AppResult<Vec<usize>> {
    list.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim().parse::<usize>().map_err(|_| {
                DaqError::Configuration(format!("invalid channel '{}'", part))
            })
        })
        .collect()
}

impl OperatorCommand {
    /// Apply the command. Returns `false` when the program should exit.
    pub fn apply(self, aggregator: &mut Aggregator) -> AppResult<bool> {
        match self {
            Self::Start => aggregator.start_test(),
            Self::Stop => aggregator.stop_test(),
            Self::Reset => aggregator.reset(),
            Self::Interval(seconds) => aggregator.set_interval(seconds)?,
            Self::Channels(channels) => aggregator.select_channels(channels)?,
            Self::Status => {}
            Self::Quit => return Ok(false),
        }
        Ok(true)
    }
}
