use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// What an operand value refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperandKind {
    /// Item, quest, temple, rank or amount.
    Value,
    /// Index into the message string table.
    Message,
    /// Bank 12 address of an instruction to continue at.
    Jump,
    /// Bank 12 address of a shop inventory.
    Shop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperandInfo {
    pub name: &'static str,
    pub width: usize,
    pub kind: OperandKind,
}

/// Static description of one opcode, as the game's interpreter reads it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpcodeInfo {
    pub code: u8,
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub operands: &'static [OperandInfo],
    /// Execution never falls through to the next byte.
    pub ends: bool,
}

impl OpcodeInfo {
    /// Opcode byte plus all operand bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self.operands.iter().map(|op| op.width).sum::<usize>()
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Opcode {
    End,
    ShowMessage,
    ShowDismissibleMessage,
    #[serde(rename = "show-message-2")]
    ShowMessage2,
    IfUpdatePlayerTitle,
    PayGold,
    SetSpawnPoint,
    AddPlayerItem,
    OpenShop,
    AddGold,
    AddMp,
    IfQuest,
    IfPlayerRank,
    IfHasGold,
    SetQuestComplete,
    ShowBuySellMenu,
    TakeItem,
    ShowSellMenu,
    IfHasItem,
    AddHp,
    ShowPassword,
    EndGame,
    Jump,
}

impl Opcode {
    /// Looks up an opcode byte. `None` means the interpreter has no handler.
    pub fn from_code(code: u8) -> Option<Self> {
        BY_CODE.get(&code).map(|info| info.opcode)
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        BY_MNEMONIC.get(mnemonic).map(|info| info.opcode)
    }

    pub fn info(self) -> &'static OpcodeInfo {
        BY_OPCODE[&self]
    }

    pub fn code(self) -> u8 {
        self.info().code
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn operands(self) -> &'static [OperandInfo] {
        self.info().operands
    }

    pub fn ends(self) -> bool {
        self.info().ends
    }

    pub fn all() -> impl Iterator<Item = Opcode> {
        OPCODES.iter().map(|info| info.opcode)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

const fn value(name: &'static str, width: usize) -> OperandInfo {
    OperandInfo {
        name,
        width,
        kind: OperandKind::Value,
    }
}

const fn jump(name: &'static str) -> OperandInfo {
    OperandInfo {
        name,
        width: 2,
        kind: OperandKind::Jump,
    }
}

const fn shop(name: &'static str) -> OperandInfo {
    OperandInfo {
        name,
        width: 2,
        kind: OperandKind::Shop,
    }
}

const MESSAGE: OperandInfo = OperandInfo {
    name: "message",
    width: 1,
    kind: OperandKind::Message,
};
const AMOUNT_8: OperandInfo = value("amount", 1);
const AMOUNT_16: OperandInfo = value("amount", 2);
const ITEM: OperandInfo = value("item", 1);
const QUEST: OperandInfo = value("quest", 1);
const RANK: OperandInfo = value("rank", 1);
const TEMPLE: OperandInfo = value("temple", 1);
const THEN: OperandInfo = jump("then");
const IF_BUY: OperandInfo = jump("if_buy");
const ADDR: OperandInfo = jump("addr");
const SHOP_ITEMS: OperandInfo = shop("items");
const SELLABLE_ITEMS: OperandInfo = shop("sellable_items");

const fn op(
    code: u8,
    opcode: Opcode,
    mnemonic: &'static str,
    operands: &'static [OperandInfo],
) -> OpcodeInfo {
    OpcodeInfo {
        code,
        opcode,
        mnemonic,
        operands,
        ends: false,
    }
}

// 0x16 has a handler in the interpreter but is never used and its behavior is
// not understood, so it is rejected like any other unknown byte.
const OPCODES: &[OpcodeInfo] = &[
    OpcodeInfo {
        ends: true,
        ..op(0x00, Opcode::End, "end", &[])
    },
    op(0x01, Opcode::ShowMessage, "show-message", &[MESSAGE]),
    op(0x02, Opcode::ShowDismissibleMessage, "show-dismissible-message", &[MESSAGE]),
    op(0x03, Opcode::ShowMessage2, "show-message-2", &[MESSAGE]),
    op(0x04, Opcode::IfUpdatePlayerTitle, "if-update-player-title", &[THEN]),
    op(0x05, Opcode::PayGold, "pay-gold", &[AMOUNT_16]),
    op(0x06, Opcode::SetSpawnPoint, "set-spawn-point", &[TEMPLE]),
    op(0x07, Opcode::AddPlayerItem, "add-player-item", &[ITEM]),
    op(0x08, Opcode::OpenShop, "open-shop", &[SHOP_ITEMS]),
    op(0x09, Opcode::AddGold, "add-gold", &[AMOUNT_16]),
    op(0x0A, Opcode::AddMp, "add-mp", &[AMOUNT_8]),
    op(0x0B, Opcode::IfQuest, "if-quest", &[QUEST, THEN]),
    op(0x0C, Opcode::IfPlayerRank, "if-player-rank", &[RANK, THEN]),
    op(0x0D, Opcode::IfHasGold, "if-has-gold", &[THEN]),
    op(0x0E, Opcode::SetQuestComplete, "set-quest-complete", &[QUEST]),
    op(0x0F, Opcode::ShowBuySellMenu, "show-buy-sell-menu", &[IF_BUY]),
    op(0x10, Opcode::TakeItem, "take-item", &[ITEM]),
    op(0x11, Opcode::ShowSellMenu, "show-sell-menu", &[SELLABLE_ITEMS]),
    op(0x12, Opcode::IfHasItem, "if-has-item", &[ITEM, THEN]),
    op(0x13, Opcode::AddHp, "add-hp", &[AMOUNT_8]),
    op(0x14, Opcode::ShowPassword, "show-password", &[]),
    op(0x15, Opcode::EndGame, "end-game", &[]),
    OpcodeInfo {
        ends: true,
        ..op(0x17, Opcode::Jump, "jump", &[ADDR])
    },
];

static BY_CODE: Lazy<HashMap<u8, &'static OpcodeInfo>> =
    Lazy::new(|| OPCODES.iter().map(|info| (info.code, info)).collect());

static BY_OPCODE: Lazy<HashMap<Opcode, &'static OpcodeInfo>> =
    Lazy::new(|| OPCODES.iter().map(|info| (info.opcode, info)).collect());

static BY_MNEMONIC: Lazy<HashMap<&'static str, &'static OpcodeInfo>> =
    Lazy::new(|| OPCODES.iter().map(|info| (info.mnemonic, info)).collect());
