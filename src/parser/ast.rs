// parser/ast.rs - Scribble Abstract Syntax Tree

use serde::{Deserialize, Serialize};

/// A position in the source text (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

/// A source span covering `[start, end)`.
///
/// Every AST node carries one so that later pipeline stages can report
/// diagnostics against the original module text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Smallest span enclosing both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A parsed Scribble module: optional module name, imports, and global
/// protocol declarations, in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Declared module name (`module a.b.C;`), if present
    pub name: Option<String>,

    /// Import declarations, in source order
    pub imports: Vec<Import>,

    /// Global protocol declarations, in source order
    pub protocols: Vec<GlobalProtocol>,
}

impl Module {
    /// Look up a protocol declaration by name.
    pub fn protocol(&self, name: &str) -> Option<&GlobalProtocol> {
        self.protocols.iter().find(|p| p.name == name)
    }
}

/// An `import a.b.C;` declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub span: Span,
}

/// A `global protocol Name(role A, role B) { ... }` declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalProtocol {
    pub name: String,

    /// Declared roles, ordered as written; names are unique
    pub roles: Vec<RoleDecl>,

    /// Protocol body: a sequence of interactions
    pub body: Vec<Interaction>,

    pub span: Span,
}

impl GlobalProtocol {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }
}

/// A role parameter in a protocol header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDecl {
    pub name: String,
    pub span: Span,
}

/// One interaction in a protocol body.
///
/// Interactions are a closed set of tagged variants; the CFG builder
/// pattern-matches on the tag rather than dispatching through a trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Interaction {
    /// `Label(T) from A to B, C;`
    Message(MessageTransfer),

    /// `choice at R { ... } or { ... }`
    Choice {
        decider: String,
        branches: Vec<Vec<Interaction>>,
        span: Span,
    },

    /// `par { ... } and { ... }`
    Parallel {
        branches: Vec<Vec<Interaction>>,
        span: Span,
    },

    /// `rec L { ... }`
    Recursion {
        label: String,
        body: Vec<Interaction>,
        span: Span,
    },

    /// `continue L;`
    Continue { label: String, span: Span },

    /// `do P(A, B);`
    Do {
        target: String,
        arguments: Vec<String>,
        span: Span,
    },
}

impl Interaction {
    pub fn span(&self) -> Span {
        match self {
            Interaction::Message(m) => m.span,
            Interaction::Choice { span, .. }
            | Interaction::Parallel { span, .. }
            | Interaction::Recursion { span, .. }
            | Interaction::Continue { span, .. }
            | Interaction::Do { span, .. } => *span,
        }
    }
}

/// A message transfer: label, payload types, sender, and one or more
/// receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTransfer {
    pub label: String,

    /// Payload type names; empty for `Label()`
    pub payload: Vec<String>,

    pub sender: String,

    /// At least one receiver; more than one is a multicast
    pub receivers: Vec<String>,

    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(Position::new(1, 1), Position::new(1, 10));
        let b = Span::new(Position::new(2, 1), Position::new(3, 4));
        let merged = a.merge(b);
        assert_eq!(merged.start, Position::new(1, 1));
        assert_eq!(merged.end, Position::new(3, 4));
    }

    #[test]
    fn test_module_protocol_lookup() {
        let module = Module {
            name: None,
            imports: vec![],
            protocols: vec![GlobalProtocol {
                name: "Ping".into(),
                roles: vec![],
                body: vec![],
                span: Span::default(),
            }],
        };
        assert!(module.protocol("Ping").is_some());
        assert!(module.protocol("Pong").is_none());
    }
}
