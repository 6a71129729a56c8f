pub mod ast;
pub mod config;
pub mod diag;
pub mod driver;
pub mod emit;
pub mod fixup;
pub mod layout;
pub(crate) mod lower;
pub mod sema;
pub mod span;
pub mod symbols;

#[cfg(test)]
mod test_support;

pub use config::CompileOptions;
pub use driver::{CompileError, CompileOutput, compile};
pub use layout::ByteMap;
pub use symbols::SymbolTable;
