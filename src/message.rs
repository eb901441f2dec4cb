use log::{debug, info};

use crate::error::{Error, Result};
use crate::rom::Rom;

const END_OF_MESSAGE: u8 = 0xFF;
const END_OF_TABLE: u8 = 0x00;

/// Control bytes and the markers they are spelled as in text.
///
/// 0xFD is the game's space, so a literal 0x20 byte reads back as `' '` and
/// is written out as 0xFD.
const SPECIALS: &[(u8, &str)] = &[
    (0xFB, "<<<TITLE>>>"),
    (0xFC, "<<<PAUSE>>>"),
    (0xFD, " "),
    (0xFE, "\n"),
];

/// The fixed PRG span holding the message strings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageRegion {
    pub offset: usize,
    pub len: usize,
}

impl MessageRegion {
    /// Bank 13, 0x8300..0xB3BA.
    pub const FAXANADU: Self = Self {
        offset: 0x34300,
        len: 0xB3BA - 0x8300,
    };
}

impl Default for MessageRegion {
    fn default() -> Self {
        Self::FAXANADU
    }
}

fn decode_message(index: usize, buf: &[u8]) -> Result<String> {
    let mut s = String::with_capacity(buf.len());
    for &byte in buf {
        if let Some((_, text)) = SPECIALS.iter().find(|(b, _)| *b == byte) {
            s.push_str(text);
        } else if byte.is_ascii() && byte != END_OF_TABLE {
            s.push(char::from(byte));
        } else {
            return Err(Error::CorruptMessage { index, byte });
        }
    }
    Ok(s)
}

fn encode_message(index: usize, message: &str, out: &mut Vec<u8>) -> Result<()> {
    let mut rest = message;
    while let Some(ch) = rest.chars().next() {
        if let Some((byte, text)) = SPECIALS.iter().find(|(_, text)| rest.starts_with(text)) {
            out.push(*byte);
            rest = &rest[text.len()..];
            continue;
        }

        if !ch.is_ascii() || ch == '\0' {
            return Err(Error::UnencodableMessage { index, ch });
        }
        out.push(ch as u8);
        rest = &rest[1..];
    }
    out.push(END_OF_MESSAGE);
    Ok(())
}

/// Reads messages until the table terminator.
pub fn decode_messages(rom: &Rom, region: &MessageRegion) -> Result<Vec<String>> {
    let bytes = rom.read_bytes(region.offset, region.len)?;

    let mut messages = Vec::new();
    let mut rest = bytes;
    while let Some(&first) = rest.first() {
        if first == END_OF_TABLE {
            break;
        }
        let index = messages.len();
        let len = rest
            .iter()
            .position(|&b| b == END_OF_MESSAGE)
            .ok_or(Error::OutOfBounds {
                addr: region.offset + (bytes.len() - rest.len()),
                len: rest.len() + 1,
                size: rom.prg_len(),
            })?;
        messages.push(decode_message(index, &rest[..len])?);
        rest = &rest[len + 1..];
    }

    debug!("decoded {} messages", messages.len());
    Ok(messages)
}

/// Encodes messages plus the table terminator.
pub fn encode_messages(messages: &[String], region: &MessageRegion) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        encode_message(index, message, &mut out)?;
    }
    out.push(END_OF_TABLE);

    if out.len() > region.len {
        return Err(Error::MessagesTooLarge {
            actual: out.len(),
            limit: region.len,
        });
    }
    Ok(out)
}

/// Writes encoded messages over the region, zero filling the remainder.
pub fn commit_messages(rom: &mut Rom, region: &MessageRegion, buf: &[u8]) -> Result<()> {
    if buf.len() > region.len {
        return Err(Error::MessagesTooLarge {
            actual: buf.len(),
            limit: region.len,
        });
    }

    let mut image = buf.to_vec();
    image.resize(region.len, 0);
    rom.write_bytes(region.offset, &image)?;

    info!("wrote {} of {} message bytes", buf.len(), region.len);
    Ok(())
}
