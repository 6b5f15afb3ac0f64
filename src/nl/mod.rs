//! The NL/SOL file exchange: problem serialization and result parsing.

pub mod reader;
pub mod writer;
