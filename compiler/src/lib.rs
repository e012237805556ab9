// patchc — patch compiler with stable state identity and hot-swap migration
//
// Library root. Front-end (lexer, parser, lower) feeds the state allocator;
// the hot-swap controller migrates state between compiled programs.

pub mod ast;
pub mod diag;
pub mod events;
pub mod hotswap;
pub mod id;
pub mod instance;
pub mod lanes;
pub mod lexer;
pub mod lower;
pub mod migrate;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod slots;
