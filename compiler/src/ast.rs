// ast.rs — Syntax tree of a patch file
//
// Lowering reads spans off these nodes when it reports diagnostics.
//
// Preconditions: built by `parser::parse`, possibly after error recovery.
// Postconditions: a node's span covers exactly its source text.
// Failure modes: none.
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte range into the patch source.
pub type Span = SimpleSpan;

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Instance(InstanceStmt),
    Block(BlockStmt),
}

// ── instance_stmt: 'instance' IDENT NUMBER ('keys' '[' key (',' key)* ']')? ──

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStmt {
    pub name: Ident,
    pub count: usize,
    pub count_span: Span,
    /// Stable per-element keys; `None` means positional identity.
    pub keys: Option<Vec<Ident>>,
}

// ── block_stmt: 'block' IDENT '=' IDENT '(' args? ')' ('@' IDENT)? ──

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub name: Ident,
    pub op: Ident,
    pub args: Vec<Arg>,
    /// Instance the block is evaluated over; `None` for scalar blocks.
    pub over: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Number(f64, Span),
    Ref(Ident),
}

impl Arg {
    pub fn span(&self) -> Span {
        match self {
            Arg::Number(_, span) => *span,
            Arg::Ref(ident) => ident.span,
        }
    }
}

// ── Identifier ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
