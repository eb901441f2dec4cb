use std::fmt;

use byteorder::{ByteOrder, LE};
use serde::{Deserialize, Serialize};

/// Item byte that ends a shop's item list.
pub const END_OF_SHOP: u8 = 0xFF;

/// Item byte plus 16-bit price.
const ITEM_LEN: usize = 3;

/// Index of a shop in the script table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(pub usize);

impl fmt::Display for ShopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a shop operand points at.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopTarget {
    /// Raw bank 12 address outside the script region.
    Address(u16),
    Shop(ShopId),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub item: u8,
    pub price: u16,
}

/// Items on sale (or accepted for sale) at one shop counter.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shop {
    items: Vec<ShopItem>,
}

impl Shop {
    pub fn new(items: Vec<ShopItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ShopItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Vec<ShopItem> {
        &mut self.items
    }

    pub fn encoded_len(&self) -> usize {
        ITEM_LEN * self.items.len() + 1
    }

    /// Reads items up to the end marker. `None` if `buf` ends first.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut items = Vec::new();
        let mut pos = 0;
        loop {
            let item = *buf.get(pos)?;
            if item == END_OF_SHOP {
                break;
            }
            let price = LE::read_u16(buf.get(pos + 1..pos + ITEM_LEN)?);
            items.push(ShopItem { item, price });
            pos += ITEM_LEN;
        }

        Some(Self::new(items))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for item in &self.items {
            let mut price = [0; 2];
            LE::write_u16(&mut price, item.price);
            out.push(item.item);
            out.extend_from_slice(&price);
        }
        out.push(END_OF_SHOP);
    }
}
