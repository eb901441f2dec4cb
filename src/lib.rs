mod decoder;
mod encoder;
mod error;
mod message;
mod opcode;
mod rom;
mod script;
mod session;
mod shop;
mod table;

pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub use message::*;
pub use opcode::*;
pub use rom::*;
pub use script::*;
pub use session::*;
pub use shop::*;
pub use table::*;
