use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::decoder::{decode_entry_script, decode_script};
use crate::encoder::{encode_scripts, EncodedScripts, POINTER_WIDTH};
use crate::error::{Error, Result, ScriptFault};
use crate::rom::{bank_of, cpu_addr, prg_offset, Rom, BANK_SIZE};
use crate::script::{JumpTarget, Script, ScriptId};
use crate::shop::{Shop, ShopId, ShopTarget};

/// The fixed PRG span holding the entry point table, followed by all script
/// and shop bytes.
///
/// The table stores one CPU address per entry point, split into a run of low
/// bytes and a run of high bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScriptRegion {
    /// PRG offset of the entry point table.
    pub offset: usize,
    /// Number of entry points.
    pub script_count: usize,
    /// Capacity for script and shop bytes after the table.
    pub len: usize,
}

impl ScriptRegion {
    /// Bank 12: 152 entry points at 0x9F6B, scripts from 0xA09B.
    pub const FAXANADU: Self = Self {
        offset: 0x31F6B,
        script_count: 152,
        len: 0xA6C8 - 0xA09A,
    };

    pub const fn table_len(&self) -> usize {
        POINTER_WIDTH * self.script_count
    }

    /// PRG offset of the first script byte.
    pub const fn data_offset(&self) -> usize {
        self.offset + self.table_len()
    }

    /// CPU address of the first script byte while the bank is mapped.
    pub const fn base_addr(&self) -> u16 {
        cpu_addr(self.data_offset())
    }

    /// Table plus script capacity: everything [`ScriptTable::commit`]
    /// overwrites.
    pub const fn span_len(&self) -> usize {
        self.table_len() + self.len
    }
}

impl Default for ScriptRegion {
    fn default() -> Self {
        Self::FAXANADU
    }
}

/// Every interaction script and the shops they open.
///
/// Scripts are indexed by [`ScriptId`]: entry points first, then scripts only
/// reached through jumps.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScriptTable {
    scripts: Vec<Script>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    shops: Vec<Shop>,
}

/// Decoding state shared by entry points and the fragments they jump to.
struct Reader<'a> {
    data: &'a [u8],
    base: u16,
    scripts: Vec<Script>,
    /// Instruction addresses. The lowest script id claiming one keeps it.
    targets: HashMap<u16, JumpTarget>,
}

impl Reader<'_> {
    fn offset_of(&self, addr: u16) -> Option<usize> {
        let offset = usize::from(addr.checked_sub(self.base)?);
        if offset < self.data.len() {
            Some(offset)
        } else {
            None
        }
    }

    fn push(&mut self, addr: u16, script: Script) {
        let id = ScriptId(self.scripts.len());
        for (index, offset) in script.instruction_offsets().into_iter().enumerate() {
            // Decoded scripts lie inside `data`, so offsets fit.
            let insn_addr = addr.wrapping_add(offset as u16);
            self.targets
                .entry(insn_addr)
                .or_insert(JumpTarget::Script { script: id, index });
        }
        self.scripts.push(script);
    }

    /// Decodes every in-region jump destination that is not yet an
    /// instruction of a decoded script, until none are left.
    fn follow_jumps(&mut self) -> Result<()> {
        let mut next = 0;
        while next < self.scripts.len() {
            let addrs: Vec<u16> = self.scripts[next]
                .instructions()
                .iter()
                .flat_map(|insn| insn.jump_targets())
                .filter_map(|target| match target {
                    JumpTarget::Address(addr) => Some(addr),
                    JumpTarget::Script { .. } => None,
                })
                .collect();

            for addr in addrs {
                if self.targets.contains_key(&addr) {
                    continue;
                }
                if let Some(start) = self.offset_of(addr) {
                    let script = ScriptId(self.scripts.len());
                    let fragment = decode_script(self.data, start)
                        .map_err(|fault| Error::CorruptScript { script, fault })?;
                    debug!("fragment {} at 0x{:04X}: {} instructions", script, addr, fragment.len());
                    self.push(addr, fragment);
                }
            }
            next += 1;
        }
        Ok(())
    }

    fn link_jumps(&mut self) {
        let mut linked = 0;
        for script in &mut self.scripts {
            for insn in script.instructions_mut() {
                for target in insn.jump_targets_mut() {
                    if let JumpTarget::Address(addr) = *target {
                        if let Some(&symbolic) = self.targets.get(&addr) {
                            *target = symbolic;
                            linked += 1;
                        }
                    }
                }
            }
        }
        debug!("linked {} jumps to script instructions", linked);
    }
}

fn read_shop(rom: &Rom, bank: usize, script: ScriptId, addr: u16) -> Result<Shop> {
    let corrupt = |fault| Error::CorruptScript { script, fault };
    let offset = prg_offset(bank, addr).ok_or_else(|| corrupt(ScriptFault::ShopOutOfBank { addr }))?;
    let buf = rom.read_bytes(offset, (bank + 1) * BANK_SIZE - offset)?;
    Shop::decode(buf).ok_or_else(|| corrupt(ScriptFault::UnterminatedShop { addr }))
}

impl ScriptTable {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self::with_shops(scripts, Vec::new())
    }

    pub fn with_shops(scripts: Vec<Script>, shops: Vec<Shop>) -> Self {
        Self { scripts, shops }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn get(&self, id: ScriptId) -> Option<&Script> {
        self.scripts.get(id.0)
    }

    pub fn get_mut(&mut self, id: ScriptId) -> Option<&mut Script> {
        self.scripts.get_mut(id.0)
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScriptId, &Script)> {
        self.scripts.iter().enumerate().map(|(i, s)| (ScriptId(i), s))
    }

    pub fn shop(&self, id: ShopId) -> Option<&Shop> {
        self.shops.get(id.0)
    }

    pub fn shop_mut(&mut self, id: ShopId) -> Option<&mut Shop> {
        self.shops.get_mut(id.0)
    }

    pub fn shops(&self) -> &[Shop] {
        &self.shops
    }

    /// Reads the entry point table and decodes every script it points at,
    /// every script those jump to, and every shop they open.
    ///
    /// Entry points sharing an address get equal copies of one script. Jumps
    /// and shop operands become symbolic references; only jumps leaving the
    /// region stay raw addresses.
    pub fn decode_all(rom: &Rom, region: &ScriptRegion) -> Result<Self> {
        let count = region.script_count;
        let table = rom.read_bytes(region.offset, region.table_len())?;
        let (lo, hi) = table.split_at(count);
        let pointers: Vec<u16> = itertools::zip(lo, hi)
            .map(|(&lo, &hi)| u16::from(hi) << 8 | u16::from(lo))
            .collect();

        let bank = bank_of(region.data_offset());
        let mut reader = Reader {
            data: rom.read_bytes(region.data_offset(), region.len)?,
            base: region.base_addr(),
            scripts: Vec::new(),
            targets: HashMap::new(),
        };
        debug!(
            "bank {} entry table at 0x{:04X}: {} entries, {} distinct",
            bank,
            cpu_addr(region.offset),
            pointers.len(),
            pointers.iter().unique().count()
        );

        let mut seen: HashMap<u16, ScriptId> = HashMap::new();
        for (i, &pointer) in pointers.iter().enumerate() {
            let script = ScriptId(i);
            if let Some(&first) = seen.get(&pointer) {
                let copy = reader.scripts[first.0].clone();
                reader.push(pointer, copy);
                continue;
            }

            let start = reader.offset_of(pointer).ok_or(Error::CorruptScript {
                script,
                fault: ScriptFault::PointerOutOfRegion { pointer },
            })?;
            let decoded = decode_entry_script(reader.data, start)
                .map_err(|fault| Error::CorruptScript { script, fault })?;
            debug!(
                "script {} at 0x{:04X}: {} instructions, {} bytes",
                script,
                pointer,
                decoded.len(),
                decoded.encoded_len()
            );
            seen.insert(pointer, script);
            reader.push(pointer, decoded);
        }

        reader.follow_jumps()?;
        reader.link_jumps();

        let mut scripts = reader.scripts;
        let mut shops = Vec::new();
        let mut shop_ids: HashMap<u16, ShopId> = HashMap::new();
        for (i, script) in scripts.iter_mut().enumerate() {
            for insn in script.instructions_mut() {
                for target in insn.shop_targets_mut() {
                    if let ShopTarget::Address(addr) = *target {
                        let id = match shop_ids.get(&addr) {
                            Some(&id) => id,
                            None => {
                                let id = ShopId(shops.len());
                                shops.push(read_shop(rom, bank, ScriptId(i), addr)?);
                                shop_ids.insert(addr, id);
                                id
                            }
                        };
                        *target = ShopTarget::Shop(id);
                    }
                }
            }
        }
        debug!("decoded {} scripts and {} shops", scripts.len(), shops.len());

        Ok(Self::with_shops(scripts, shops))
    }

    /// Encodes the entry point table, all scripts and all shops for `region`.
    pub fn encode(&self, region: &ScriptRegion) -> Result<EncodedScripts> {
        encode_scripts(&self.scripts, &self.shops, region)
    }

    /// Encodes the table into the bytes [`commit`](Self::commit) writes.
    pub fn encode_all(&self, region: &ScriptRegion) -> Result<Vec<u8>> {
        Ok(self.encode(region)?.bytes)
    }

    /// Writes an encoded buffer over the region, zero filling whatever the
    /// buffer does not cover. The ROM is left untouched on error.
    pub fn commit(rom: &mut Rom, region: &ScriptRegion, buf: &[u8]) -> Result<()> {
        if buf.len() > region.span_len() {
            return Err(Error::ScriptTooLarge {
                actual: buf.len().saturating_sub(region.table_len()),
                limit: region.len,
            });
        }

        let mut image = buf.to_vec();
        image.resize(region.span_len(), 0);
        rom.write_bytes(region.offset, &image)?;

        info!(
            "wrote {} of {} script bytes at PRG 0x{:05X}",
            buf.len().saturating_sub(region.table_len()),
            region.len,
            region.data_offset()
        );
        Ok(())
    }
}

impl From<Vec<Script>> for ScriptTable {
    fn from(scripts: Vec<Script>) -> Self {
        Self::new(scripts)
    }
}
