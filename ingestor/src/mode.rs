use std::fmt;

/// Operating mode of the irrigation pump, stored verbatim in the `mode` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Otomatis,
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Otomatis => "otomatis",
            Mode::Manual => "manual",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens accepted on the control topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Auto,
    ManualOn,
    ManualOff,
}

impl ControlCommand {
    /// Matches the payload byte-for-byte; anything else is `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"AUTO" => Some(Self::Auto),
            b"MANUAL_ON" => Some(Self::ManualOn),
            b"MANUAL_OFF" => Some(Self::ManualOff),
            _ => None,
        }
    }

    pub fn target_mode(self) -> Mode {
        match self {
            Self::Auto => Mode::Otomatis,
            // the pump's on/off state is not tracked here, only who drives it
            Self::ManualOn | Self::ManualOff => Mode::Manual,
        }
    }
}

#[derive(Debug, Default)]
pub struct ModeState {
    current: Mode,
}

impl ModeState {
    pub fn current(&self) -> Mode {
        self.current
    }

    /// Applies a command and returns `true` if the mode actually changed.
    pub fn apply(&mut self, command: ControlCommand) -> bool {
        let next = command.target_mode();
        let changed = next != self.current;
        self.current = next;
        changed
    }
}
