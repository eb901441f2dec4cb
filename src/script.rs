use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScriptFault;
use crate::opcode::{Opcode, OperandKind};
use crate::shop::ShopTarget;

/// Index of a script in the table. Entry points come first, in entry point
/// table order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(pub usize);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a branching instruction continues.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpTarget {
    /// Raw bank 12 address outside the script region.
    Address(u16),
    /// Instruction `index` of `script`. Follows the script when it moves.
    Script { script: ScriptId, index: usize },
}

impl JumpTarget {
    pub fn script_start(script: ScriptId) -> Self {
        Self::Script { script, index: 0 }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(u16),
    Message(u8),
    Jump(JumpTarget),
    Shop(ShopTarget),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Self::Value(_) => OperandKind::Value,
            Self::Message(_) => OperandKind::Message,
            Self::Jump(_) => OperandKind::Jump,
            Self::Shop(_) => OperandKind::Shop,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    pub fn end() -> Self {
        Self::new(Opcode::End, vec![])
    }

    pub fn show_message(message: u8) -> Self {
        Self::new(Opcode::ShowMessage, vec![Operand::Message(message)])
    }

    pub fn jump(target: JumpTarget) -> Self {
        Self::new(Opcode::Jump, vec![Operand::Jump(target)])
    }

    /// Byte length once encoded. Depends only on the opcode.
    pub fn encoded_len(&self) -> usize {
        self.opcode.info().encoded_len()
    }

    pub fn is_terminal(&self) -> bool {
        self.opcode.ends()
    }

    pub fn jump_targets(&self) -> impl Iterator<Item = JumpTarget> + '_ {
        self.operands.iter().filter_map(|operand| match *operand {
            Operand::Jump(target) => Some(target),
            _ => None,
        })
    }

    pub fn jump_targets_mut(&mut self) -> impl Iterator<Item = &mut JumpTarget> {
        self.operands.iter_mut().filter_map(|operand| match operand {
            Operand::Jump(target) => Some(target),
            _ => None,
        })
    }

    pub fn shop_targets_mut(&mut self) -> impl Iterator<Item = &mut ShopTarget> {
        self.operands.iter_mut().filter_map(|operand| match operand {
            Operand::Shop(target) => Some(target),
            _ => None,
        })
    }

    /// Checks the operands against the opcode's shape. `index` is only used
    /// to report the position of a bad instruction.
    pub fn check_operands(&self, index: usize) -> Result<(), ScriptFault> {
        let shape = self.opcode.operands();
        if shape.len() != self.operands.len() {
            return Err(ScriptFault::OperandMismatch { index });
        }

        for (info, operand) in itertools::zip(shape, &self.operands) {
            if info.kind != operand.kind() {
                return Err(ScriptFault::OperandMismatch { index });
            }
            if let Operand::Value(value) = *operand {
                if info.width == 1 && value > 0xFF {
                    return Err(ScriptFault::OperandTooWide { index, value });
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for operand in &self.operands {
            match operand {
                Operand::Value(v) => write!(f, " {}", v)?,
                Operand::Message(m) => write!(f, " msg-{:02x}", m)?,
                Operand::Jump(JumpTarget::Address(addr)) => write!(f, " ${:04X}", addr)?,
                Operand::Jump(JumpTarget::Script { script, index }) => {
                    write!(f, " {}:{}", script, index)?
                }
                Operand::Shop(ShopTarget::Address(addr)) => write!(f, " shop@${:04X}", addr)?,
                Operand::Shop(ShopTarget::Shop(shop)) => write!(f, " shop{}", shop)?,
            }
        }
        Ok(())
    }
}

/// One interaction script: instructions up to and including a terminal one.
///
/// Entry points start with an entity byte naming the NPC or item the script
/// belongs to. Scripts only reached through jumps have none.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<u8>,
    instructions: Vec<Instruction>,
}

impl Script {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            entity: None,
            instructions,
        }
    }

    pub fn with_entity(entity: u8, instructions: Vec<Instruction>) -> Self {
        Self {
            entity: Some(entity),
            instructions,
        }
    }

    pub fn entity(&self) -> Option<u8> {
        self.entity
    }

    pub fn set_entity(&mut self, entity: Option<u8>) {
        self.entity = entity;
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn entity_len(&self) -> usize {
        usize::from(self.entity.is_some())
    }

    /// Entity byte plus all instructions.
    pub fn encoded_len(&self) -> usize {
        self.entity_len() + self.instructions.iter().map(Instruction::encoded_len).sum::<usize>()
    }

    /// Byte offset of each instruction from the start of the script,
    /// entity byte included.
    pub fn instruction_offsets(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .scan(self.entity_len(), |offset, insn| {
                let cur = *offset;
                *offset += insn.encoded_len();
                Some(cur)
            })
            .collect()
    }

    /// Checks that exactly the last instruction is terminal and that every
    /// instruction has operands matching its opcode.
    pub fn validate(&self) -> Result<(), ScriptFault> {
        let last = match self.instructions.last() {
            Some(insn) if insn.is_terminal() => self.instructions.len() - 1,
            _ => return Err(ScriptFault::MissingTerminal),
        };

        if let Some(index) = self.instructions[..last]
            .iter()
            .position(Instruction::is_terminal)
        {
            return Err(ScriptFault::InstructionAfterTerminal { index: index + 1 });
        }

        for (index, insn) in self.instructions.iter().enumerate() {
            insn.check_operands(index)?;
        }

        Ok(())
    }
}

impl From<Vec<Instruction>> for Script {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}
