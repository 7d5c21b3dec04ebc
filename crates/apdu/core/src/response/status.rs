//! Status words returned by Calypso cards and SAMs

use std::fmt;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if the selected application is invalidated (62 83)
    pub const fn is_invalidated(&self) -> bool {
        self.sw1 == 0x62 && self.sw2 == 0x83
    }

    /// Check if the access conditions of the file are not met (69 82)
    pub const fn is_security_condition_not_satisfied(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x82
    }

    /// Check if the card refused the command in its current state (69 85)
    pub const fn is_conditions_not_satisfied(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x85
    }

    /// Check if a session signature was rejected (69 88)
    pub const fn is_incorrect_signature(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x88
    }

    /// Check if the addressed file or application is absent (6A 82)
    pub const fn is_file_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x82
    }

    /// Check if the addressed record is absent (6A 83)
    pub const fn is_record_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x83
    }

    /// Short description for logs and error messages
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x62, 0x83) => "Selected application invalidated",
            (0x64, 0x00) => "State of non-volatile memory unchanged",
            (0x64, 0x01) => "Too many modifications in session",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x81) => "Command incompatible with file structure",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x88) => "Incorrect signature",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x83) => "Record not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6D, 0x00) => "Instruction code not supported",
            (0x6E, 0x00) => "Class not supported",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Status words the validator and its virtual cards exchange
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Selected application invalidated (62 83)
    pub const INVALIDATED: StatusWord = StatusWord::new(0x62, 0x83);

    /// Counter or record left unchanged (64 00)
    pub const MEMORY_UNCHANGED: StatusWord = StatusWord::new(0x64, 0x00);

    /// Too many modifications in session (64 01)
    pub const SESSION_BUFFER_OVERFLOW: StatusWord = StatusWord::new(0x64, 0x01);

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Command incompatible with file structure (69 81)
    pub const COMMAND_INCOMPATIBLE: StatusWord = StatusWord::new(0x69, 0x81);

    /// Security condition not satisfied (69 82)
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

    /// Incorrect signature (69 88)
    pub const INCORRECT_SIGNATURE: StatusWord = StatusWord::new(0x69, 0x88);

    /// File not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);

    /// Record not found (6A 83)
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x83);

    /// Incorrect parameters P1-P2 (6A 86)
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);

    /// Referenced data not found (6A 88)
    pub const REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);

    /// Invalid instruction (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Class not supported (6E 00)
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_checks() {
        assert!(common::SUCCESS.is_success());
        assert!(common::INVALIDATED.is_invalidated());
        assert!(common::SECURITY_CONDITION_NOT_SATISFIED.is_security_condition_not_satisfied());
        assert!(common::CONDITIONS_NOT_SATISFIED.is_conditions_not_satisfied());
        assert!(common::INCORRECT_SIGNATURE.is_incorrect_signature());
        assert!(common::FILE_NOT_FOUND.is_file_not_found());
        assert!(common::RECORD_NOT_FOUND.is_record_not_found());
        assert!(!common::MEMORY_UNCHANGED.is_success());
    }

    #[test]
    fn test_status_word_description() {
        assert_eq!(common::SUCCESS.description(), "Success");
        assert_eq!(common::MEMORY_UNCHANGED.description(), "State of non-volatile memory unchanged");
        assert_eq!(StatusWord::new(0x6F, 0x00).description(), "Unknown status word");
        assert_eq!(common::RECORD_NOT_FOUND.to_string(), "6A83");
    }
}
