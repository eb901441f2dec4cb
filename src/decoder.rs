use byteorder::{ByteOrder, LE};

use crate::error::ScriptFault;
use crate::opcode::{Opcode, OperandKind};
use crate::script::{Instruction, JumpTarget, Operand, Script};
use crate::shop::ShopTarget;

/// Decodes the instruction at `offset`, returning it with its byte length.
pub fn decode_instruction(region: &[u8], offset: usize) -> Result<(Instruction, usize), ScriptFault> {
    let code = *region
        .get(offset)
        .ok_or(ScriptFault::Unterminated { offset })?;
    let opcode = Opcode::from_code(code).ok_or(ScriptFault::UnknownOpcode { offset, opcode: code })?;

    let mut pos = offset + 1;
    let mut operands = Vec::with_capacity(opcode.operands().len());
    for info in opcode.operands() {
        let buf = region
            .get(pos..pos + info.width)
            .ok_or(ScriptFault::Unterminated { offset: region.len() })?;
        pos += info.width;

        let raw = match info.width {
            1 => u16::from(buf[0]),
            _ => LE::read_u16(buf),
        };
        operands.push(match info.kind {
            OperandKind::Value => Operand::Value(raw),
            OperandKind::Message => Operand::Message(buf[0]),
            OperandKind::Jump => Operand::Jump(JumpTarget::Address(raw)),
            OperandKind::Shop => Operand::Shop(ShopTarget::Address(raw)),
        });
    }

    Ok((Instruction::new(opcode, operands), pos - offset))
}

/// Decodes one script starting at `start`, up to and including its terminal
/// instruction.
///
/// Decoding never reads past `region`; pass a shorter slice to impose a
/// tighter limit. Jump operands come out as raw addresses.
pub fn decode_script(region: &[u8], start: usize) -> Result<Script, ScriptFault> {
    let mut instructions = Vec::new();
    let mut offset = start;

    loop {
        let (insn, len) = decode_instruction(region, offset)?;
        offset += len;

        let ends = insn.is_terminal();
        instructions.push(insn);
        if ends {
            break;
        }
    }

    Ok(Script::new(instructions))
}

/// Decodes an entry point script: the entity byte at `start`, then
/// instructions as [`decode_script`] does.
pub fn decode_entry_script(region: &[u8], start: usize) -> Result<Script, ScriptFault> {
    let entity = *region
        .get(start)
        .ok_or(ScriptFault::Unterminated { offset: start })?;
    let mut script = decode_script(region, start + 1)?;
    script.set_entity(Some(entity));
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_until_terminal() {
        let region = [
            0xFF, // padding before the script
            0x01, 0x05, // show-message 5
            0x12, 0x41, 0x34, 0xA1, // if-has-item 0x41 -> $A134
            0x09, 0xE8, 0x03, // add-gold 1000
            0x00, // end
            0x01, 0x06, // unreachable
        ];

        let script = decode_script(&region, 1).unwrap();
        assert_eq!(
            script.instructions(),
            &[
                Instruction::show_message(5),
                Instruction::new(
                    Opcode::IfHasItem,
                    vec![Operand::Value(0x41), Operand::Jump(JumpTarget::Address(0xA134))],
                ),
                Instruction::new(Opcode::AddGold, vec![Operand::Value(1000)]),
                Instruction::end(),
            ]
        );
        assert_eq!(script.encoded_len(), 10);
    }

    #[test]
    fn jump_terminates() {
        let region = [0x14, 0x17, 0x00, 0xA0, 0x00];
        let script = decode_script(&region, 0).unwrap();
        assert_eq!(script.len(), 2);
        assert!(script.instructions()[1].is_terminal());
        assert!(!script.instructions()[0].is_terminal());
    }

    #[test]
    fn entry_script_starts_with_entity() {
        // The entity byte would read as `end` or an unknown opcode.
        let region = [0x00, 0x01, 0x05, 0x00, 0x85, 0x14, 0x00];

        let script = decode_entry_script(&region, 0).unwrap();
        assert_eq!(script.entity(), Some(0x00));
        assert_eq!(script.instructions(), &[Instruction::show_message(5), Instruction::end()]);
        assert_eq!(script.encoded_len(), 4);

        let script = decode_entry_script(&region, 4).unwrap();
        assert_eq!(script.entity(), Some(0x85));
        assert_eq!(script.len(), 2);

        assert_eq!(
            decode_entry_script(&region, 7),
            Err(ScriptFault::Unterminated { offset: 7 })
        );
    }

    #[test]
    fn unknown_opcode_is_corrupt() {
        let region = [0x01, 0x02, 0x16, 0x00];
        assert_eq!(
            decode_script(&region, 0),
            Err(ScriptFault::UnknownOpcode { offset: 2, opcode: 0x16 })
        );
    }

    #[test]
    fn running_off_the_region_is_corrupt() {
        let region = [0x01, 0x02, 0x13, 0x01];
        assert_eq!(
            decode_script(&region, 0),
            Err(ScriptFault::Unterminated { offset: 4 })
        );

        // Operand cut off by the region end.
        let region = [0x05, 0x10];
        assert_eq!(
            decode_script(&region, 0),
            Err(ScriptFault::Unterminated { offset: 2 })
        );
    }

    #[test]
    fn instruction_length_matches_opcode_table() {
        for op in Opcode::all() {
            let mut region = vec![op.code()];
            region.resize(op.info().encoded_len(), 0x7F);
            let (insn, len) = decode_instruction(&region, 0).unwrap();
            assert_eq!(len, op.info().encoded_len());
            assert_eq!(insn.encoded_len(), len);
            assert_eq!(insn.check_operands(0), Ok(()));
        }
    }
}
