use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;

use byteorder::{ByteOrder, LE};
use log::debug;

use crate::error::{Error, Result, ScriptFault};
use crate::script::{Instruction, JumpTarget, Operand, Script, ScriptId};
use crate::shop::{Shop, ShopId, ShopTarget, END_OF_SHOP};
use crate::table::ScriptRegion;

/// Bytes per entry point: one in the low-byte half of the table, one in the
/// high-byte half.
pub const POINTER_WIDTH: usize = 2;

/// Where every script, instruction and shop lands once a table is encoded.
///
/// Scripts with equal content share one body, so entry points the game
/// shipped as aliases stay aliases.
#[derive(Clone, Debug)]
pub struct Layout {
    base_addr: u16,
    limit: usize,
    script_offsets: Vec<usize>,
    insn_offsets: Vec<Vec<usize>>,
    bodies: Vec<ScriptId>,
    shop_offsets: Vec<usize>,
    len: usize,
}

impl Layout {
    /// `base_addr` is the CPU address of the first byte after the entry point
    /// table, `limit` the capacity from there.
    pub fn new(scripts: &[Script], shops: &[Shop], base_addr: u16, limit: usize) -> Self {
        let mut firsts = HashMap::new();
        let mut bodies = Vec::new();
        let mut script_offsets = Vec::with_capacity(scripts.len());
        let mut len = 0;
        for (i, script) in scripts.iter().enumerate() {
            let offset = *firsts.entry(script).or_insert_with(|| {
                bodies.push(ScriptId(i));
                len += script.encoded_len();
                len - script.encoded_len()
            });
            script_offsets.push(offset);
        }

        let mut shop_offsets = Vec::with_capacity(shops.len());
        for shop in shops {
            shop_offsets.push(len);
            len += shop.encoded_len();
        }

        Self {
            base_addr,
            limit,
            script_offsets,
            insn_offsets: scripts.iter().map(Script::instruction_offsets).collect(),
            bodies,
            shop_offsets,
            len,
        }
    }

    /// Script and shop bytes, entry point table excluded.
    pub fn total_len(&self) -> usize {
        self.len
    }

    /// Scripts whose bytes are emitted, in emission order.
    pub fn bodies(&self) -> &[ScriptId] {
        &self.bodies
    }

    fn addr(&self, offset: usize) -> Option<u16> {
        let offset = u16::try_from(offset).ok()?;
        self.base_addr.checked_add(offset)
    }

    /// Whether `addr` falls in the span this layout rewrites.
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.base_addr && usize::from(addr - self.base_addr) < self.limit
    }

    /// Address of the first byte of `script`, entity byte included.
    pub fn script_addr(&self, script: ScriptId) -> Option<u16> {
        self.addr(*self.script_offsets.get(script.0)?)
    }

    pub fn address_of(&self, script: ScriptId, index: usize) -> Option<u16> {
        let start = *self.script_offsets.get(script.0)?;
        let insn = *self.insn_offsets[script.0].get(index)?;
        self.addr(start + insn)
    }

    pub fn shop_addr(&self, shop: ShopId) -> Option<u16> {
        self.addr(*self.shop_offsets.get(shop.0)?)
    }

    /// Raw addresses inside the rewritten span would land on whatever gets
    /// encoded there, so only symbolic targets may point into it.
    pub fn resolve(&self, target: JumpTarget) -> Option<u16> {
        match target {
            JumpTarget::Address(addr) if self.contains(addr) => None,
            JumpTarget::Address(addr) => Some(addr),
            JumpTarget::Script { script, index } => self.address_of(script, index),
        }
    }

    pub fn resolve_shop(&self, target: ShopTarget) -> Option<u16> {
        match target {
            ShopTarget::Address(addr) if self.contains(addr) => None,
            ShopTarget::Address(addr) => Some(addr),
            ShopTarget::Shop(shop) => self.shop_addr(shop),
        }
    }
}

/// An operand [`Layout`] cannot place.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Unresolved {
    Jump(JumpTarget),
    Shop(ShopTarget),
}

/// Encoded entry point table and script bytes, ready to be written at the
/// region start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedScripts {
    /// CPU address of each entry point.
    pub pointers: Vec<u16>,
    /// Low bytes of all pointers, high bytes of all pointers, then scripts
    /// and shops.
    pub bytes: Vec<u8>,
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0; 2];
    LE::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// Appends one instruction to `out`.
pub fn encode_instruction(
    insn: &Instruction,
    layout: &Layout,
    out: &mut Vec<u8>,
) -> std::result::Result<(), Unresolved> {
    out.push(insn.opcode.code());

    for (info, operand) in itertools::zip(insn.opcode.operands(), &insn.operands) {
        let raw = match *operand {
            Operand::Value(v) => v,
            Operand::Message(m) => u16::from(m),
            Operand::Jump(target) => layout.resolve(target).ok_or(Unresolved::Jump(target))?,
            Operand::Shop(target) => layout
                .resolve_shop(target)
                .ok_or(Unresolved::Shop(target))?,
        };
        match info.width {
            1 => out.push(raw as u8),
            _ => push_u16(out, raw),
        }
    }

    Ok(())
}

/// Entry points whose fragments are not jumped to at instruction 0 would not
/// be found again when decoding.
fn check_reachable(scripts: &[Script], entry_count: usize) -> Result<()> {
    let mut seen: HashSet<usize> = (0..entry_count).collect();
    let mut queue: Vec<usize> = (0..entry_count).collect();
    while let Some(i) = queue.pop() {
        for insn in scripts[i].instructions() {
            for target in insn.jump_targets() {
                if let JumpTarget::Script { script, index } = target {
                    if index == 0 && script.0 < scripts.len() && seen.insert(script.0) {
                        queue.push(script.0);
                    }
                }
            }
        }
    }

    match (entry_count..scripts.len()).find(|i| !seen.contains(i)) {
        Some(i) => Err(Error::UnreachableScript { script: ScriptId(i) }),
        None => Ok(()),
    }
}

fn validate(scripts: &[Script], shops: &[Shop], entry_count: usize) -> Result<()> {
    if scripts.len() < entry_count {
        return Err(Error::ScriptCountMismatch {
            expected: entry_count,
            actual: scripts.len(),
        });
    }

    for (i, script) in scripts.iter().enumerate() {
        let invalid = |fault| Error::InvalidScript {
            script: ScriptId(i),
            fault,
        };
        script.validate().map_err(invalid)?;
        match (i < entry_count, script.entity()) {
            (true, None) => return Err(invalid(ScriptFault::MissingEntity)),
            (false, Some(_)) => return Err(invalid(ScriptFault::UnexpectedEntity)),
            _ => {}
        }
    }
    check_reachable(scripts, entry_count)?;

    for (i, shop) in shops.iter().enumerate() {
        if shop.items().iter().any(|item| item.item == END_OF_SHOP) {
            return Err(Error::InvalidShop { shop: ShopId(i) });
        }
    }

    Ok(())
}

/// Serializes the entry point table followed by every distinct script body
/// and every shop.
///
/// The first `region.script_count` scripts are the entry points. Fails
/// without producing anything if a script or shop is malformed, an operand
/// cannot be placed, or the scripts and shops exceed `region.len` bytes.
pub fn encode_scripts(scripts: &[Script], shops: &[Shop], region: &ScriptRegion) -> Result<EncodedScripts> {
    let entry_count = region.script_count;
    validate(scripts, shops, entry_count)?;

    let layout = Layout::new(scripts, shops, region.base_addr(), region.len);
    let total = layout.total_len();
    debug!(
        "encoding {} scripts ({} bodies) and {} shops: {} bytes, limit {}",
        scripts.len(),
        layout.bodies().len(),
        shops.len(),
        total,
        region.len
    );
    if total > region.len {
        return Err(Error::ScriptTooLarge {
            actual: total,
            limit: region.len,
        });
    }

    let pointers = (0..entry_count)
        .map(|i| layout.script_addr(ScriptId(i)))
        .collect::<Option<Vec<_>>>()
        .ok_or(Error::ScriptTooLarge {
            actual: total,
            limit: usize::from(u16::MAX - region.base_addr()),
        })?;

    let mut bytes = Vec::with_capacity(region.table_len() + total);
    bytes.extend(pointers.iter().map(|&p| p as u8));
    bytes.extend(pointers.iter().map(|&p| (p >> 8) as u8));
    for &id in layout.bodies() {
        let script = &scripts[id.0];
        bytes.extend(script.entity());
        for insn in script.instructions() {
            encode_instruction(insn, &layout, &mut bytes).map_err(|unresolved| match unresolved {
                Unresolved::Jump(target) => Error::BadJumpTarget { script: id, target },
                Unresolved::Shop(target) => Error::BadShopTarget { script: id, target },
            })?;
        }
    }
    for shop in shops {
        shop.encode(&mut bytes);
    }
    debug_assert_eq!(bytes.len(), region.table_len() + total);

    Ok(EncodedScripts { pointers, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_instruction;
    use crate::opcode::{Opcode, OperandKind};
    use crate::shop::ShopItem;

    const REGION: ScriptRegion = ScriptRegion {
        offset: 0x31F6B,
        script_count: 3,
        len: 0x100,
    };
    const BASE: u16 = REGION.base_addr();
    const TABLE: usize = REGION.table_len();

    fn operand_for(kind: OperandKind, width: usize, seed: u16) -> Operand {
        let value = if width == 1 { seed & 0xFF } else { seed };
        match kind {
            OperandKind::Value => Operand::Value(value),
            OperandKind::Message => Operand::Message(value as u8),
            OperandKind::Jump => Operand::Jump(JumpTarget::Address(value)),
            OperandKind::Shop => Operand::Shop(ShopTarget::Address(value)),
        }
    }

    #[test]
    fn every_opcode_round_trips() {
        let layout = Layout::new(&[], &[], BASE, 0);
        for op in Opcode::all() {
            for &seed in &[0x0000, 0x0001, 0x00FF, 0x1234, 0xFFFF] {
                let insn = Instruction::new(
                    op,
                    op.operands()
                        .iter()
                        .map(|info| operand_for(info.kind, info.width, seed))
                        .collect(),
                );

                let mut buf = Vec::new();
                encode_instruction(&insn, &layout, &mut buf).unwrap();
                assert_eq!(buf.len(), insn.encoded_len());
                assert_eq!(buf[0], op.code());

                let (decoded, len) = decode_instruction(&buf, 0).unwrap();
                assert_eq!(len, buf.len());
                assert_eq!(decoded, insn);
            }
        }
    }

    #[test]
    fn operands_are_little_endian() {
        let insn = Instruction::new(Opcode::IfQuest, vec![
            Operand::Value(3),
            Operand::Jump(JumpTarget::Address(0xA1C3)),
        ]);
        let mut buf = Vec::new();
        encode_instruction(&insn, &Layout::new(&[], &[], BASE, 0), &mut buf).unwrap();
        assert_eq!(buf, vec![0x0B, 0x03, 0xC3, 0xA1]);
    }

    /// Three entry points and one fragment reached from the last of them.
    fn scripts() -> Vec<Script> {
        vec![
            Script::with_entity(0x80, vec![Instruction::show_message(1), Instruction::end()]),
            Script::with_entity(0x81, vec![
                Instruction::new(Opcode::AddGold, vec![Operand::Value(50)]),
                Instruction::show_message(2),
                Instruction::jump(JumpTarget::Script {
                    script: ScriptId(0),
                    index: 1,
                }),
            ]),
            Script::with_entity(0x82, vec![
                Instruction::new(
                    Opcode::IfHasItem,
                    vec![Operand::Value(7), Operand::Jump(JumpTarget::script_start(ScriptId(3)))],
                ),
                Instruction::end(),
            ]),
            Script::new(vec![Instruction::end()]),
        ]
    }

    #[test]
    fn pointer_table_is_split_and_cumulative() {
        let scripts = scripts();
        let encoded = encode_scripts(&scripts, &[], &REGION).unwrap();

        let mut expect = 0;
        for (&pointer, script) in itertools::zip(&encoded.pointers, &scripts) {
            assert_eq!(usize::from(pointer - BASE), expect);
            expect += script.encoded_len();
        }
        assert_eq!(encoded.pointers, vec![BASE, BASE + 4, BASE + 13]);

        let [lo, hi] = BASE.to_le_bytes();
        assert_eq!(&encoded.bytes[..TABLE], &[lo, lo + 4, lo + 13, hi, hi, hi]);
        assert_eq!(encoded.bytes.len(), TABLE + 4 + 9 + 6 + 1);
        assert_eq!(encoded.bytes[TABLE], 0x80);
    }

    #[test]
    fn symbolic_jumps_resolve_to_new_layout() {
        let encoded = encode_scripts(&scripts(), &[], &REGION).unwrap();
        let data = &encoded.bytes[TABLE..];

        // Script 1 ends with a jump to the `end` of script 0.
        let jump = 4 + 1 + 3 + 2;
        assert_eq!(data[jump], 0x17);
        assert_eq!(LE::read_u16(&data[jump + 1..]), BASE + 3);

        // Script 2 branches to the fragment after it.
        let branch = 13 + 1;
        assert_eq!(data[branch], 0x12);
        assert_eq!(LE::read_u16(&data[branch + 2..]), BASE + 19);
        assert_eq!(data[19], 0x00);
    }

    #[test]
    fn equal_scripts_share_one_body() {
        let mut scripts = scripts();
        scripts[1] = scripts[0].clone();
        let layout = Layout::new(&scripts, &[], BASE, REGION.len);
        assert_eq!(layout.bodies(), &[ScriptId(0), ScriptId(2), ScriptId(3)]);
        assert_eq!(layout.total_len(), 4 + 6 + 1);

        let encoded = encode_scripts(&scripts, &[], &REGION).unwrap();
        assert_eq!(encoded.pointers, vec![BASE, BASE, BASE + 4]);
        assert_eq!(encoded.bytes.len(), TABLE + 11);
    }

    #[test]
    fn shops_follow_scripts() {
        let mut scripts = scripts();
        scripts[0].instructions_mut().insert(
            0,
            Instruction::new(Opcode::OpenShop, vec![Operand::Shop(ShopTarget::Shop(ShopId(1)))]),
        );
        let shops = vec![
            Shop::new(vec![ShopItem { item: 0x10, price: 80 }]),
            Shop::new(vec![ShopItem { item: 0x41, price: 0x1234 }]),
        ];

        let encoded = encode_scripts(&scripts, &shops, &REGION).unwrap();
        let data = &encoded.bytes[TABLE..];
        let scripts_len = 23;
        assert_eq!(LE::read_u16(&data[2..]), BASE + scripts_len as u16 + 4);
        assert_eq!(&data[scripts_len..], &[0x10, 80, 0, 0xFF, 0x41, 0x34, 0x12, 0xFF]);
    }

    #[test]
    fn size_limit_is_inclusive() {
        let scripts = scripts();
        let total = Layout::new(&scripts, &[], BASE, REGION.len).total_len();
        let region = |len| ScriptRegion { len, ..REGION };

        assert!(encode_scripts(&scripts, &[], &region(total)).is_ok());
        assert!(matches!(
            encode_scripts(&scripts, &[], &region(total - 1)),
            Err(Error::ScriptTooLarge { actual, limit }) if actual == total && limit == total - 1
        ));
    }

    #[test]
    fn rejects_raw_addresses_into_the_region() {
        let mut scripts = scripts();
        let inside = JumpTarget::Address(BASE + 4);
        scripts[2] = Script::with_entity(0x82, vec![Instruction::jump(inside)]);
        scripts.pop();
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::BadJumpTarget { script: ScriptId(2), target }) if target == inside
        ));

        // Past the region end is fine.
        let outside = JumpTarget::Address(BASE + REGION.len as u16);
        scripts[2] = Script::with_entity(0x82, vec![Instruction::jump(outside)]);
        assert!(encode_scripts(&scripts, &[], &REGION).is_ok());

        let shop = ShopTarget::Address(BASE + 0x20);
        scripts[0].instructions_mut()[0] = Instruction::new(Opcode::OpenShop, vec![Operand::Shop(shop)]);
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::BadShopTarget { script: ScriptId(0), target }) if target == shop
        ));
    }

    #[test]
    fn rejects_bad_scripts() {
        let mut scripts = scripts();
        scripts[2].instructions_mut().clear();
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::InvalidScript { script: ScriptId(2), .. })
        ));

        let mut scripts = self::scripts();
        let target = JumpTarget::Script {
            script: ScriptId(0),
            index: 5,
        };
        scripts[1].instructions_mut()[2] = Instruction::jump(target);
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::BadJumpTarget { script: ScriptId(1), target: t }) if t == target
        ));

        let mut scripts = self::scripts();
        scripts[0].instructions_mut()[0] =
            Instruction::new(Opcode::OpenShop, vec![Operand::Shop(ShopTarget::Shop(ShopId(0)))]);
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::BadShopTarget { script: ScriptId(0), .. })
        ));
    }

    #[test]
    fn entity_bytes_mark_entry_points() {
        let mut scripts = scripts();
        scripts[1].set_entity(None);
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::InvalidScript {
                script: ScriptId(1),
                fault: ScriptFault::MissingEntity,
            })
        ));

        let mut scripts = self::scripts();
        scripts[3].set_entity(Some(0));
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::InvalidScript {
                script: ScriptId(3),
                fault: ScriptFault::UnexpectedEntity,
            })
        ));
    }

    #[test]
    fn fragments_must_be_reachable() {
        let mut scripts = scripts();
        scripts[2].instructions_mut()[0] = Instruction::new(
            Opcode::IfHasItem,
            vec![
                Operand::Value(7),
                Operand::Jump(JumpTarget::Address(0x8123)),
            ],
        );
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::UnreachableScript { script: ScriptId(3) })
        ));

        let mut scripts = self::scripts();
        scripts.truncate(2);
        assert!(matches!(
            encode_scripts(&scripts, &[], &REGION),
            Err(Error::ScriptCountMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn rejects_end_marker_as_item() {
        let shops = vec![Shop::new(vec![ShopItem { item: END_OF_SHOP, price: 1 }])];
        assert!(matches!(
            encode_scripts(&scripts(), &shops, &REGION),
            Err(Error::InvalidShop { shop: ShopId(0) })
        ));
    }
}
