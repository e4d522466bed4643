pub mod chats;

pub use chats::*;
