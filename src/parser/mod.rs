// parser/mod.rs - Scribble Source Parsing

//! Scribble 2.0 front end.
//!
//! Turns module source text into a [`Module`] AST with a source span on
//! every node. Parsing is a hand-written recursive descent over a fully
//! buffered token stream, which gives the grammar unbounded lookahead for
//! the productions that share prefixes (`protocol Name(roles)` with and
//! without a trailing clause, message transfers with and without an
//! optional suffix).
//!
//! # Example
//!
//! ```
//! use scribble_mpst::parser::parse;
//!
//! let module = parse(
//!     "global protocol RR(role C, role S) {
//!          Req(Int) from C to S;
//!          Resp(String) from S to C;
//!      }",
//! )
//! .unwrap();
//! assert_eq!(module.protocols[0].name, "RR");
//! ```

mod ast;
mod grammar;
mod lexer;

pub use ast::{
    GlobalProtocol, Import, Interaction, MessageTransfer, Module, Position, RoleDecl, Span,
};
pub use grammar::parse;
pub use lexer::{tokenize, Token, TokenKind};

use serde::{Deserialize, Serialize};

/// A syntactic error with its source position.
///
/// The parser reports the first unrecoverable error per statement and
/// resynchronises at `;`, `}` or the next `global` keyword, so one call may
/// surface several of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("parse error at {line}:{column}: expected {expected}, found {found}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub expected: String,
    pub found: String,
}

impl ParseError {
    pub fn new(at: Position, expected: &str, found: &str) -> Self {
        Self {
            line: at.line,
            column: at.column,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
