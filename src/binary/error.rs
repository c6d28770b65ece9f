use thiserror::Error;

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Faults raised while decoding a module. Every variant records the absolute
/// byte offset at which the fault was detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed header at offset {offset:#x}: expected {expected:02X?}, found {found:02X?}")]
    MalformedHeader {
        offset: usize,
        expected: Vec<u8>,
        found: Vec<u8>,
    },

    #[error("unknown section id {id} at offset {offset:#x}")]
    UnknownSectionId { offset: usize, id: u8 },

    #[error("unknown opcode {opcode:#04X} at offset {offset:#x}")]
    UnknownOpcode { offset: usize, opcode: u8 },

    #[error("unknown import kind {kind:#04X} at offset {offset:#x}")]
    UnknownImportKind { offset: usize, kind: u8 },

    #[error("unknown export kind {kind:#04X} at offset {offset:#x}")]
    UnknownExportKind { offset: usize, kind: u8 },

    #[error("unexpected end of stream at offset {offset:#x}: {needed} more byte(s) required")]
    UnexpectedEndOfStream { offset: usize, needed: usize },

    #[error("malformed LEB128 integer at offset {offset:#x}")]
    MalformedLeb128 { offset: usize },

    #[error("invalid value type {byte:#04X} at offset {offset:#x}")]
    InvalidValueType { offset: usize, byte: u32 },

    #[error("invalid element type {byte:#04X} at offset {offset:#x}")]
    InvalidElemType { offset: usize, byte: u8 },

    #[error("invalid mutability {byte:#04X} at offset {offset:#x}")]
    InvalidMutability { offset: usize, byte: u8 },

    #[error("invalid limits flag {flag:#04X} at offset {offset:#x}")]
    InvalidLimitsFlag { offset: usize, flag: u8 },

    #[error("reserved byte must be zero, found {byte:#04X} at offset {offset:#x}")]
    InvalidReservedByte { offset: usize, byte: u8 },

    #[error("invalid utf-8 name at offset {offset:#x}")]
    InvalidUtf8 { offset: usize },

    #[error(
        "section {id} at offset {offset:#x} declares {declared} byte(s) but {consumed} were decoded"
    )]
    SectionSizeMismatch {
        offset: usize,
        id: u8,
        declared: usize,
        consumed: usize,
    },

    #[error("section {id} at offset {offset:#x} must not follow section {previous}")]
    SectionOutOfOrder { offset: usize, id: u8, previous: u8 },

    #[error("section {id} at offset {offset:#x} appears more than once")]
    DuplicateSection { offset: usize, id: u8 },

    #[error(
        "code section at offset {offset:#x} has {bodies} bodies for {functions} declared functions"
    )]
    FunctionCountMismatch {
        offset: usize,
        functions: usize,
        bodies: usize,
    },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match *self {
            Self::MalformedHeader { offset, .. }
            | Self::UnknownSectionId { offset, .. }
            | Self::UnknownOpcode { offset, .. }
            | Self::UnknownImportKind { offset, .. }
            | Self::UnknownExportKind { offset, .. }
            | Self::UnexpectedEndOfStream { offset, .. }
            | Self::MalformedLeb128 { offset }
            | Self::InvalidValueType { offset, .. }
            | Self::InvalidElemType { offset, .. }
            | Self::InvalidMutability { offset, .. }
            | Self::InvalidLimitsFlag { offset, .. }
            | Self::InvalidReservedByte { offset, .. }
            | Self::InvalidUtf8 { offset }
            | Self::SectionSizeMismatch { offset, .. }
            | Self::SectionOutOfOrder { offset, .. }
            | Self::DuplicateSection { offset, .. }
            | Self::FunctionCountMismatch { offset, .. } => offset,
        }
    }
}
