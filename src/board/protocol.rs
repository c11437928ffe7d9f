use anyhow::{Result, anyhow};

/// Duty cycle register of boards with register support.
pub const REG_DUTY_CYCLE: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Single byte speed command understood by every firmware revision.
    LegacySetSpeed { speed: u8 },
    ReadRegister { register: u8 },
    WriteRegister { register: u8, value: u8 },
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::LegacySetSpeed { speed } => vec![speed],
            Command::ReadRegister { register } => vec![register],
            Command::WriteRegister { register, value } => vec![register, value],
        }
    }

    pub fn expected_response_len(&self) -> usize {
        match *self {
            Command::LegacySetSpeed { .. } | Command::WriteRegister { .. } => 0,
            Command::ReadRegister { .. } => 1,
        }
    }

    /// Speed command for the selected protocol, capped at 100.
    pub fn set_speed(speed: u8, extended: bool) -> Self {
        let speed = speed.min(100);
        if extended {
            Command::WriteRegister {
                register: REG_DUTY_CYCLE,
                value: speed,
            }
        } else {
            Command::LegacySetSpeed { speed }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Ack,
    Register(u8),
}

impl Response {
    pub fn parse(cmd: Command, buf: &[u8]) -> Result<Self> {
        match cmd {
            Command::LegacySetSpeed { .. } | Command::WriteRegister { .. } => Ok(Response::Ack),
            Command::ReadRegister { register } => buf
                .first()
                .copied()
                .map(Response::Register)
                .ok_or_else(|| anyhow!("Empty read of register {register:#04x}")),
        }
    }
}

/// Value written by the capability probe: different from `current` and
/// still a valid duty cycle.
pub fn probe_value(current: u8) -> u8 {
    let next = current.saturating_add(1);
    if next >= 100 { 98 } else { next }
}
