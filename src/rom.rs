use std::convert::{TryFrom, TryInto};

use byteorder::{ByteOrder, LE};
use eyre::{ensure, WrapErr};

use crate::error::{Error, Result};

pub const INES_HEADER_LEN: usize = 16;
pub const PRG_SIZE: usize = 0x40000;
pub const BANK_SIZE: usize = 0x4000;

const INES_MAGIC: &[u8] = b"NES\x1A";
const CHR_UNIT: usize = 0x2000;

/// A Faxanadu cartridge image.
///
/// All accessor addresses are PRG offsets, i.e. relative to the start of PRG
/// ROM with the iNES header stripped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rom {
    header: [u8; INES_HEADER_LEN],
    prg: Vec<u8>,
    chr: Vec<u8>,
}

impl Rom {
    pub fn from_ines_bytes(buf: impl AsRef<[u8]>) -> eyre::Result<Self> {
        let buf = buf.as_ref();
        ensure!(buf.len() >= INES_HEADER_LEN, "file too short for an iNES header");
        ensure!(buf.starts_with(INES_MAGIC), "iNES magic not found");

        let header: [u8; INES_HEADER_LEN] = buf[..INES_HEADER_LEN].try_into()?;
        let prg_len = usize::from(header[4]) * BANK_SIZE;
        let chr_len = usize::from(header[5]) * CHR_UNIT;
        ensure!(prg_len == PRG_SIZE, "PRG size mismatch: {:#X}", prg_len);
        ensure!(
            buf.len() == INES_HEADER_LEN + prg_len + chr_len,
            "size mismatch"
        );

        let prg = buf[INES_HEADER_LEN..][..prg_len].to_vec();
        let chr = buf[INES_HEADER_LEN + prg_len..].to_vec();

        Ok(Self { header, prg, chr })
    }

    /// Builds an image around bare PRG bytes, with a synthesised header.
    pub fn from_prg(prg: Vec<u8>) -> eyre::Result<Self> {
        let banks = u8::try_from(prg.len() / BANK_SIZE)
            .wrap_err_with(|| format!("PRG too large for an iNES header: {:#X}", prg.len()))?;

        let mut header = [0; INES_HEADER_LEN];
        header[..4].copy_from_slice(INES_MAGIC);
        header[4] = banks;
        header[6] = 0x10; // MMC1

        Ok(Self {
            header,
            prg,
            chr: Vec::new(),
        })
    }

    pub fn to_ines_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INES_HEADER_LEN + self.prg.len() + self.chr.len());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.prg);
        buf.extend_from_slice(&self.chr);
        buf
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn prg_len(&self) -> usize {
        self.prg.len()
    }

    pub fn read_u8(&self, addr: usize) -> Result<u8> {
        Ok(self.read_bytes(addr, 1)?[0])
    }

    pub fn read_u16(&self, addr: usize) -> Result<u16> {
        Ok(LE::read_u16(self.read_bytes(addr, 2)?))
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8]> {
        let range = self.checked_range(addr, len)?;
        Ok(&self.prg[range])
    }

    pub fn write_u8(&mut self, addr: usize, value: u8) -> Result<()> {
        self.write_bytes(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: usize, value: u16) -> Result<()> {
        let mut buf = [0; 2];
        LE::write_u16(&mut buf, value);
        self.write_bytes(addr, &buf)
    }

    /// Copies `bytes` into PRG at `addr`. Nothing is written unless the whole
    /// span fits.
    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        let range = self.checked_range(addr, bytes.len())?;
        self.prg[range].copy_from_slice(bytes);
        Ok(())
    }

    fn checked_range(&self, addr: usize, len: usize) -> Result<std::ops::Range<usize>> {
        let size = self.prg.len();
        match addr.checked_add(len) {
            Some(end) if end <= size => Ok(addr..end),
            _ => Err(Error::OutOfBounds { addr, len, size }),
        }
    }
}

/// Bank number holding a PRG offset.
pub fn bank_of(offset: usize) -> usize {
    offset / BANK_SIZE
}

/// CPU address of a PRG offset while its bank is mapped at 0x8000.
pub const fn cpu_addr(offset: usize) -> u16 {
    (0x8000 + offset % BANK_SIZE) as u16
}

/// PRG offset of `addr` in `bank`. `None` unless `addr` lies in the
/// switchable window 0x8000..0xC000.
pub fn prg_offset(bank: usize, addr: u16) -> Option<usize> {
    if (0x8000..0xC000).contains(&addr) {
        Some(bank * BANK_SIZE + usize::from(addr - 0x8000))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ines_image() -> Vec<u8> {
        let mut buf = Rom::from_prg(vec![0; PRG_SIZE]).unwrap().to_ines_bytes();
        buf[INES_HEADER_LEN + 0x100] = 0xAB;
        buf
    }

    #[test]
    fn loads_and_saves_ines_image() {
        let buf = ines_image();
        let rom = Rom::from_ines_bytes(&buf).unwrap();

        assert_eq!(rom.prg_len(), PRG_SIZE);
        assert_eq!(rom.read_u8(0x100).unwrap(), 0xAB);
        assert_eq!(rom.to_ines_bytes(), buf);
    }

    #[test]
    fn rejects_bad_magic_and_size() {
        let mut buf = ines_image();
        buf.pop();
        assert!(Rom::from_ines_bytes(&buf).is_err());

        let mut buf = ines_image();
        buf[0] = b'X';
        assert!(Rom::from_ines_bytes(&buf).is_err());
    }

    #[test]
    fn accessors_are_bounds_checked() {
        let mut rom = Rom::from_prg(vec![0; 0x10]).unwrap();

        rom.write_u16(0x0E, 0xBEEF).unwrap();
        assert_eq!(rom.read_u16(0x0E).unwrap(), 0xBEEF);
        assert_eq!(rom.read_bytes(0x0E, 2).unwrap(), &[0xEF, 0xBE]);

        assert!(matches!(
            rom.read_u8(0x10),
            Err(Error::OutOfBounds { addr: 0x10, len: 1, size: 0x10 })
        ));
        assert!(matches!(
            rom.read_bytes(usize::MAX, 2),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            rom.write_bytes(0x0F, &[1, 2]),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(rom.read_u8(0x0F).unwrap(), 0xBE);
    }

    #[test]
    fn bank_addressing() {
        assert_eq!(bank_of(0x3209A), 12);
        assert_eq!(cpu_addr(0x3209A), 0xA09A);
        assert_eq!(prg_offset(12, 0xA09A), Some(0x3209A));
        assert_eq!(prg_offset(13, 0x8300), Some(0x34300));
        assert_eq!(prg_offset(12, 0xC000), None);
        assert_eq!(prg_offset(12, 0x7FFF), None);
    }

    #[test]
    fn from_prg_rejects_oversized_image() {
        assert!(Rom::from_prg(vec![0; 0x100 * BANK_SIZE]).is_err());
        assert_eq!(Rom::from_prg(vec![0; PRG_SIZE]).unwrap().to_ines_bytes()[4], 16);
    }
}
