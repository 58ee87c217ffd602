//! Room-scoped chat relay: connections join named rooms and exchange
//! messages, typing indicators, and presence updates over newline-delimited
//! JSON packets.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
