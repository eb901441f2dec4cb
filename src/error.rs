use thiserror::Error;

use crate::script::{JumpTarget, ScriptId};
use crate::shop::{ShopId, ShopTarget};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while reading or patching ROM content.
#[derive(Debug, Error)]
pub enum Error {
    #[error("access of {len} byte(s) at PRG offset 0x{addr:05X} is outside the {size:#X}-byte image")]
    OutOfBounds { addr: usize, len: usize, size: usize },

    #[error("script {script} is corrupt: {fault}")]
    CorruptScript { script: ScriptId, fault: ScriptFault },

    #[error("encoded scripts and shops take {actual} bytes, but the region only holds {limit}")]
    ScriptTooLarge { actual: usize, limit: usize },

    #[error("table holds {actual} scripts, but the entry point table has {expected} entries")]
    ScriptCountMismatch { expected: usize, actual: usize },

    #[error("script {script} cannot be encoded: {fault}")]
    InvalidScript { script: ScriptId, fault: ScriptFault },

    #[error("script {script} jumps to {target:?}, which is not an instruction the encoder can place")]
    BadJumpTarget { script: ScriptId, target: JumpTarget },

    #[error("script {script} refers to shop {target:?}, which the encoder cannot place")]
    BadShopTarget { script: ScriptId, target: ShopTarget },

    #[error("no entry point jumps to the start of script {script}")]
    UnreachableScript { script: ScriptId },

    #[error("shop {shop} lists item 0xFF, which ends the item list")]
    InvalidShop { shop: ShopId },

    #[error("message {index} contains byte 0x{byte:02X}, which has no character")]
    CorruptMessage { index: usize, byte: u8 },

    #[error("message {index} contains {ch:?}, which has no byte encoding")]
    UnencodableMessage { index: usize, ch: char },

    #[error("encoded messages take {actual} bytes, but the region only holds {limit}")]
    MessagesTooLarge { actual: usize, limit: usize },
}

impl Error {
    /// Checks that the error is one the caller can fix by changing content,
    /// as opposed to a wrong ROM image.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            Self::ScriptTooLarge { .. }
                | Self::ScriptCountMismatch { .. }
                | Self::InvalidScript { .. }
                | Self::BadJumpTarget { .. }
                | Self::BadShopTarget { .. }
                | Self::UnreachableScript { .. }
                | Self::InvalidShop { .. }
                | Self::UnencodableMessage { .. }
                | Self::MessagesTooLarge { .. }
        )
    }
}

/// Where and why a single script is malformed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ScriptFault {
    #[error("unknown opcode 0x{opcode:02X} at region offset 0x{offset:03X}")]
    UnknownOpcode { offset: usize, opcode: u8 },

    #[error("ran past the region end at offset 0x{offset:03X} without reaching a terminal instruction")]
    Unterminated { offset: usize },

    #[error("entry address 0x{pointer:04X} lies outside the region")]
    PointerOutOfRegion { pointer: u16 },

    #[error("shop address 0x{addr:04X} is not in the switchable bank window")]
    ShopOutOfBank { addr: u16 },

    #[error("shop at 0x{addr:04X} has no end marker before the bank ends")]
    UnterminatedShop { addr: u16 },

    #[error("last instruction is not terminal")]
    MissingTerminal,

    #[error("instruction {index} follows a terminal instruction")]
    InstructionAfterTerminal { index: usize },

    #[error("operands of instruction {index} do not match its opcode")]
    OperandMismatch { index: usize },

    #[error("operand value {value:#X} of instruction {index} does not fit its width")]
    OperandTooWide { index: usize, value: u16 },

    #[error("entry point has no entity byte")]
    MissingEntity,

    #[error("only entry points carry an entity byte")]
    UnexpectedEntity,
}
