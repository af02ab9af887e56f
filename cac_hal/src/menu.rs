//! Interactive text menu.
//!
//! One command per line:
//!
//! | Input | Action |
//! |-------|--------|
//! | `S` | poll sensors and print the readings |
//! | `L` | toggle every valve |
//! | `V <id> <0\|1>` | set one valve |
//! | `P` | print the last readings without polling |
//! | `H` | help |
//! | `Q` | quit |

use crate::control::{ControlEndpoint, SensorReading};
use crate::error::CacError;
use cac_common::device::DeviceId;
use cac_common::state::{DeviceStatus, ValveState};
use std::fmt::Write as _;
use std::str::FromStr;

/// Help text printed at startup and on `H`.
pub const MENU_HELP: &str = "\
Commands:
  S            poll sensors
  P            print last sensor values
  L            toggle all valves
  V <id> <0|1> set valve
  H            help
  Q            quit";

/// A parsed menu line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    /// Poll every sensor
    PollSensors,
    /// Print cached sensor values
    PrintSensors,
    /// Invert every valve
    ToggleAll,
    /// Set one valve
    SetValve(DeviceId, bool),
    /// Print help
    Help,
    /// Leave the menu
    Quit,
}

impl FromStr for MenuCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Err("empty command".to_string());
        };

        let command = match cmd.to_ascii_uppercase().as_str() {
            "S" => Self::PollSensors,
            "P" => Self::PrintSensors,
            "L" => Self::ToggleAll,
            "H" | "?" => Self::Help,
            "Q" => Self::Quit,
            "V" => {
                let id = words
                    .next()
                    .and_then(|w| w.parse::<u16>().ok())
                    .ok_or_else(|| "usage: V <id> <0|1>".to_string())?;
                let open = match words.next() {
                    Some("1") => true,
                    Some("0") => false,
                    _ => return Err("usage: V <id> <0|1>".to_string()),
                };
                Self::SetValve(DeviceId(id), open)
            }
            other => return Err(format!("unknown command {other:?}")),
        };

        if words.next().is_some() {
            return Err(format!("unexpected arguments after {cmd:?}"));
        }
        Ok(command)
    }
}

/// What the caller should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuFlow {
    /// Read the next command
    Continue,
    /// Leave the menu
    Quit,
}

/// Run one command against the control endpoint and return the text to print.
pub fn execute(
    control: &mut ControlEndpoint,
    command: MenuCommand,
) -> Result<(MenuFlow, String), CacError> {
    let output = match command {
        MenuCommand::PollSensors => render_readings(&control.trigger_sensor_poll()?),
        MenuCommand::PrintSensors => render_readings(&control.sensor_snapshot()?),
        MenuCommand::ToggleAll => {
            control.toggle_all()?;
            render_valves(&control.valve_states()?)
        }
        MenuCommand::SetValve(id, open) => {
            control.set_valve(id, open)?;
            format!("valve {id} -> {}", if open { "open" } else { "closed" })
        }
        MenuCommand::Help => MENU_HELP.to_string(),
        MenuCommand::Quit => return Ok((MenuFlow::Quit, String::new())),
    };
    Ok((MenuFlow::Continue, output))
}

fn status_label(status: Option<DeviceStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "invalid".to_string(),
    }
}

/// One line per sensor: id, name, value, status.
pub fn render_readings(readings: &[SensorReading]) -> String {
    let mut out = String::new();
    for r in readings {
        let _ = writeln!(
            out,
            "{:>4}  {:<16} {:>6}  {}",
            r.id,
            r.name,
            r.value,
            status_label(r.status)
        );
    }
    out
}

/// One line per valve: id, name, desired, applied, status.
pub fn render_valves(valves: &[ValveState]) -> String {
    let mut out = String::new();
    for v in valves {
        let _ = writeln!(
            out,
            "{:>4}  {:<16} desired={} applied={}  {}",
            v.device_id(),
            v.name.as_str(),
            u8::from(v.desired()),
            u8::from(v.applied()),
            status_label(v.status())
        );
    }
    out
}
