use std::fmt;
use std::str::FromStr;

use crate::utils::FleetError;

/// Control commands understood by the vehicle firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartRent,
    EndRent,
    KillVehicle,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::StartRent, Command::EndRent, Command::KillVehicle];

    /// Name used as the command segment of `control.{command}.{vehicleId}`.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::StartRent => "start_rent",
            Command::EndRent => "end_rent",
            Command::KillVehicle => "kill_vehicle",
        }
    }
}

impl FromStr for Command {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| FleetError::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
