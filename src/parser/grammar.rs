// parser/grammar.rs - Recursive Descent Grammar

use super::ast::{
    GlobalProtocol, Import, Interaction, MessageTransfer, Module, Position, RoleDecl, Span,
};
use super::lexer::{tokenize, Token, TokenKind};
use super::ParseError;

/// Parse a Scribble module.
///
/// On success returns the AST; on failure returns every error collected
/// before parsing gave up. Statement-level errors are recovered by skipping
/// to the next `;` or `}`; protocol-level errors skip to the next `global`.
pub fn parse(source: &str) -> Result<Module, Vec<ParseError>> {
    let tokens = tokenize(source).map_err(|e| vec![e])?;
    Grammar::new(tokens).module()
}

struct Grammar {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Grammar {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    // ---- token cursor -----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> TokenKind {
        self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", token.text)
        };
        ParseError::new(token.span.start, expected, &found)
    }

    fn here(&self) -> Position {
        self.peek().span.start
    }

    // ---- identifiers ------------------------------------------------------

    fn ident(&mut self, what: &str) -> Result<Token, ParseError> {
        if self.at(TokenKind::Ident) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// Identifier that must start with an uppercase letter: protocol, role
    /// and payload type names. Message labels are exempt; the scenario
    /// corpus uses both `Req` and `accept`.
    fn upper_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        let token = self.ident(what)?;
        if token.text.chars().next().is_some_and(|c| c.is_lowercase()) {
            return Err(ParseError::new(
                token.span.start,
                &format!("{} (uppercase initial)", what),
                &format!("'{}'", token.text),
            ));
        }
        Ok(token)
    }

    fn qualified_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.ident("module name")?.text;
        while self.eat(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.ident("module name segment")?.text);
        }
        Ok(name)
    }

    // ---- error recovery ---------------------------------------------------

    /// Skip to just past the next `;`, or stop before `}` / `global` / EOF.
    fn recover_statement(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Semicolon => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace | TokenKind::Global | TokenKind::Eof => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skip to the next top-level `global` keyword.
    fn recover_toplevel(&mut self) {
        while !self.at(TokenKind::Global) && !self.at(TokenKind::Eof) {
            self.bump();
        }
    }

    // ---- productions ------------------------------------------------------

    fn module(mut self) -> Result<Module, Vec<ParseError>> {
        let mut module = Module {
            name: None,
            imports: Vec::new(),
            protocols: Vec::new(),
        };

        if self.eat(TokenKind::Module) {
            match self.qualified_name() {
                Ok(name) => {
                    module.name = Some(name);
                    if let Err(e) = self.expect(TokenKind::Semicolon) {
                        self.errors.push(e);
                        self.recover_statement();
                    }
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover_statement();
                }
            }
        }

        while self.at(TokenKind::Import) {
            let start = self.here();
            self.bump();
            match self.qualified_name() {
                Ok(name) => {
                    let end = self.peek().span.end;
                    if let Err(e) = self.expect(TokenKind::Semicolon) {
                        self.errors.push(e);
                        self.recover_statement();
                    }
                    module.imports.push(Import {
                        module: name,
                        span: Span::new(start, end),
                    });
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover_statement();
                }
            }
        }

        while !self.at(TokenKind::Eof) {
            match self.global_protocol() {
                Ok(protocol) => module.protocols.push(protocol),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_toplevel();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(module)
        } else {
            Err(self.errors)
        }
    }

    fn global_protocol(&mut self) -> Result<GlobalProtocol, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Global)?;
        self.expect(TokenKind::Protocol)?;
        let name = self.upper_ident("protocol name")?.text;

        self.expect(TokenKind::LParen)?;
        let mut roles = Vec::new();
        loop {
            self.expect(TokenKind::Role)?;
            let role = self.upper_ident("role name")?;
            if roles.iter().any(|r: &RoleDecl| r.name == role.text) {
                return Err(ParseError::new(
                    role.span.start,
                    "a distinct role name",
                    &format!("duplicate role '{}'", role.text),
                ));
            }
            roles.push(RoleDecl {
                name: role.text,
                span: role.span,
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.block()?;
        let end = self.tokens[self.pos.saturating_sub(1)].span.end;

        Ok(GlobalProtocol {
            name,
            roles,
            body,
            span: Span::new(start, end),
        })
    }

    fn block(&mut self) -> Result<Vec<Interaction>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut interactions = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            match self.interaction() {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_statement();
                    if self.at(TokenKind::Global) || self.at(TokenKind::Eof) {
                        // Cannot resynchronise inside this block; give up on it.
                        return Err(self.unexpected("'}'"));
                    }
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(interactions)
    }

    fn interaction(&mut self) -> Result<Interaction, ParseError> {
        match self.peek_kind() {
            TokenKind::Choice => self.choice(),
            TokenKind::Par => self.parallel(),
            TokenKind::Rec => self.recursion(),
            TokenKind::Continue => self.continue_stmt(),
            TokenKind::Do => self.do_stmt(),
            TokenKind::Ident => self.message(),
            _ => Err(self.unexpected("an interaction")),
        }
    }

    fn choice(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Choice)?;
        self.expect(TokenKind::At)?;
        let decider = self.upper_ident("role name")?.text;

        let mut branches = vec![self.block()?];
        while self.eat(TokenKind::Or) {
            branches.push(self.block()?);
        }
        if branches.len() < 2 {
            return Err(self.unexpected("'or'"));
        }
        let end = self.tokens[self.pos - 1].span.end;

        Ok(Interaction::Choice {
            decider,
            branches,
            span: Span::new(start, end),
        })
    }

    fn parallel(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Par)?;

        let mut branches = vec![self.block()?];
        while self.eat(TokenKind::And) {
            branches.push(self.block()?);
        }
        if branches.len() < 2 {
            return Err(self.unexpected("'and'"));
        }
        let end = self.tokens[self.pos - 1].span.end;

        Ok(Interaction::Parallel {
            branches,
            span: Span::new(start, end),
        })
    }

    fn recursion(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Rec)?;
        let label = self.upper_ident("recursion label")?.text;
        let body = self.block()?;
        let end = self.tokens[self.pos - 1].span.end;

        Ok(Interaction::Recursion {
            label,
            body,
            span: Span::new(start, end),
        })
    }

    fn continue_stmt(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Continue)?;
        let label = self.upper_ident("recursion label")?.text;
        let end = self.expect(TokenKind::Semicolon)?.span.end;

        Ok(Interaction::Continue {
            label,
            span: Span::new(start, end),
        })
    }

    fn do_stmt(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        self.expect(TokenKind::Do)?;
        let target = self.upper_ident("protocol name")?.text;

        self.expect(TokenKind::LParen)?;
        let mut arguments = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                arguments.push(self.upper_ident("role argument")?.text);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let end = self.expect(TokenKind::Semicolon)?.span.end;

        Ok(Interaction::Do {
            target,
            arguments,
            span: Span::new(start, end),
        })
    }

    /// Message transfers come in three shapes, distinguished by lookahead
    /// on the token after the first identifier:
    ///
    /// ```text
    /// Label(T) from A to B, C;     // canonical
    /// Label(T) A to B;             // elided 'from'
    /// A -> B: Label(T);            // arrow
    /// ```
    fn message(&mut self) -> Result<Interaction, ParseError> {
        if self.peek_ahead(1) == TokenKind::Arrow {
            return self.message_arrow();
        }

        let start = self.here();
        let label = self.ident("message label")?.text;
        let payload = self.payload()?;

        let sender = match self.peek_kind() {
            TokenKind::From => {
                self.bump();
                self.upper_ident("role name")?.text
            }
            TokenKind::Ident => self.upper_ident("role name")?.text,
            _ => return Err(self.unexpected("'from' or a role name")),
        };

        self.expect(TokenKind::To)?;
        let mut receivers = vec![self.upper_ident("role name")?.text];
        while self.eat(TokenKind::Comma) {
            receivers.push(self.upper_ident("role name")?.text);
        }
        let end = self.expect(TokenKind::Semicolon)?.span.end;

        Ok(Interaction::Message(MessageTransfer {
            label,
            payload,
            sender,
            receivers,
            span: Span::new(start, end),
        }))
    }

    fn message_arrow(&mut self) -> Result<Interaction, ParseError> {
        let start = self.here();
        let sender = self.upper_ident("role name")?.text;
        self.expect(TokenKind::Arrow)?;
        let mut receivers = vec![self.upper_ident("role name")?.text];
        while self.eat(TokenKind::Comma) {
            receivers.push(self.upper_ident("role name")?.text);
        }
        self.expect(TokenKind::Colon)?;
        let label = self.ident("message label")?.text;
        let payload = self.payload()?;
        let end = self.expect(TokenKind::Semicolon)?.span.end;

        Ok(Interaction::Message(MessageTransfer {
            label,
            payload,
            sender,
            receivers,
            span: Span::new(start, end),
        }))
    }

    fn payload(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut payload = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                payload.push(self.upper_ident("payload type")?.text);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(payload)
    }
}
