use log::{info, warn};

use crate::error::Result;
use crate::rom::Rom;
use crate::table::{ScriptRegion, ScriptTable};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Table matches the ROM.
    Loaded,
    /// Table was handed out for editing.
    Modified,
    /// Edits were encoded and written.
    Committed,
    /// Encoding failed; the ROM was not written.
    Rejected,
}

/// An editing session over the scripts of one ROM image.
///
/// The session borrows the image exclusively, so no one else can observe it
/// between decode and commit.
#[derive(Debug)]
pub struct Session<'rom> {
    rom: &'rom mut Rom,
    region: ScriptRegion,
    table: ScriptTable,
    state: SessionState,
}

impl<'rom> Session<'rom> {
    pub fn load(rom: &'rom mut Rom, region: ScriptRegion) -> Result<Self> {
        let table = ScriptTable::decode_all(rom, &region)?;
        info!("loaded {} scripts", table.len());

        Ok(Self {
            rom,
            region,
            table,
            state: SessionState::Loaded,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table(&self) -> &ScriptTable {
        &self.table
    }

    pub fn rom(&self) -> &Rom {
        &*self.rom
    }

    pub fn table_mut(&mut self) -> &mut ScriptTable {
        self.state = SessionState::Modified;
        &mut self.table
    }

    pub fn replace_table(&mut self, table: ScriptTable) {
        self.table = table;
        self.state = SessionState::Modified;
    }

    /// Encodes the table and writes it to the ROM.
    ///
    /// On failure the session becomes [`SessionState::Rejected`] and the ROM
    /// keeps its previous content.
    pub fn commit(&mut self) -> Result<()> {
        match self.table.encode_all(&self.region) {
            Ok(buf) => {
                ScriptTable::commit(self.rom, &self.region, &buf)?;
                self.state = SessionState::Committed;
                Ok(())
            }
            Err(e) => {
                warn!("script table rejected: {}", e);
                self.state = SessionState::Rejected;
                Err(e)
            }
        }
    }

    /// Drops all edits and reloads the table from the ROM.
    pub fn discard(&mut self) -> Result<()> {
        self.table = ScriptTable::decode_all(self.rom, &self.region)?;
        self.state = SessionState::Loaded;
        Ok(())
    }

    pub fn into_table(self) -> ScriptTable {
        self.table
    }
}

impl From<Session<'_>> for ScriptTable {
    fn from(session: Session<'_>) -> Self {
        session.into_table()
    }
}
