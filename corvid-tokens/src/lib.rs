//! Parsing and building of the classic IRC line grammar (RFC 2812), with the
//! number of allocations kept minimal: [`Message::parse`] never allocates,
//! and the reply builders write straight into one growable buffer per
//! connection.

pub use buffers::{Buffer, MessageBuffer, ReplyBuffer};
pub use command::Command;
pub use message::{assert_msg, Message, MESSAGE_LENGTH, PARAMS_LENGTH};

mod buffers;
mod command;
mod message;
pub mod rpl;
