//! Shared protocol constants for the dexft wire format

use std::fmt;

// Well-known port for all traffic
pub const DEFAULT_PORT: u16 = 9413;

// Fixed text capacities (zero-padded, not length-prefixed)
pub const PATTERN_CAPACITY: usize = 512;
pub const NAME_CAPACITY: usize = 128;

// File content is streamed in chunks of this size
pub const CHUNK_SIZE: usize = 64 * 1024;

// Listen backlog when none is configured
pub const DEFAULT_BACKLOG: u32 = 10;

// Encoded packet sizes
pub mod packet_len {
    use super::{NAME_CAPACITY, PATTERN_CAPACITY};

    /// command u32 | pattern | total_files u32
    pub const INIT_REQUEST: usize = 4 + PATTERN_CAPACITY + 4;
    /// proceed u8 | pad 3 | total_files u32
    pub const INIT_REPLY: usize = 1 + 3 + 4;
    /// start u8
    pub const START_SIGNAL: usize = 1;
    /// name | size u64 | mtime i64
    pub const FILE_DESCRIPTOR: usize = NAME_CAPACITY + 8 + 8;
}

/// Session command, carried once in the initiation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pull,
    Push,
    List,
}

impl Command {
    pub fn to_wire(self) -> u32 {
        match self {
            Command::Pull => 0,
            Command::Push => 1,
            Command::List => 2,
        }
    }

    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Command::Pull),
            1 => Some(Command::Push),
            2 => Some(Command::List),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Pull => "PULL",
            Command::Push => "PUSH",
            Command::List => "LIST",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_values_are_stable() {
        assert_eq!(Command::Pull.to_wire(), 0);
        assert_eq!(Command::Push.to_wire(), 1);
        assert_eq!(Command::List.to_wire(), 2);
        for cmd in [Command::Pull, Command::Push, Command::List] {
            assert_eq!(Command::from_wire(cmd.to_wire()), Some(cmd));
        }
        assert_eq!(Command::from_wire(3), None);
        assert_eq!(Command::from_wire(u32::MAX), None);
    }

    #[test]
    fn test_packet_sizes() {
        assert_eq!(packet_len::INIT_REQUEST, 520);
        assert_eq!(packet_len::INIT_REPLY, 8);
        assert_eq!(packet_len::START_SIGNAL, 1);
        assert_eq!(packet_len::FILE_DESCRIPTOR, 144);
    }
}
