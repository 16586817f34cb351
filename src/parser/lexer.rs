// parser/lexer.rs - Scribble Tokenizer

use super::ast::{Position, Span};
use super::ParseError;

/// Token kinds of the Scribble surface syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Module,
    Import,
    Global,
    Protocol,
    Role,
    From,
    To,
    Choice,
    At,
    Or,
    Par,
    And,
    Rec,
    Continue,
    Do,

    /// Any identifier; case conventions are enforced by the grammar
    Ident,

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Arrow,
    Dot,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Module => "'module'",
            TokenKind::Import => "'import'",
            TokenKind::Global => "'global'",
            TokenKind::Protocol => "'protocol'",
            TokenKind::Role => "'role'",
            TokenKind::From => "'from'",
            TokenKind::To => "'to'",
            TokenKind::Choice => "'choice'",
            TokenKind::At => "'at'",
            TokenKind::Or => "'or'",
            TokenKind::Par => "'par'",
            TokenKind::And => "'and'",
            TokenKind::Rec => "'rec'",
            TokenKind::Continue => "'continue'",
            TokenKind::Do => "'do'",
            TokenKind::Ident => "identifier",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Colon => "':'",
            TokenKind::Arrow => "'->'",
            TokenKind::Dot => "'.'",
            TokenKind::Eof => "end of input",
        }
    }
}

/// A lexed token with its source text and span.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// Tokenize a full source string.
///
/// Comments (`// ...` and `/* ... */`) and whitespace are skipped. The
/// returned stream always ends with a single `Eof` token so the grammar can
/// look ahead without bounds checks.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn peek_second(&self) -> char {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next().unwrap_or('\0')
    }

    fn next_char(&mut self) -> char {
        let c = self.peek_char();
        if c != '\0' {
            self.pos += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            let c = self.peek_char();
            if c.is_whitespace() {
                self.next_char();
            } else if c == '/' && self.peek_second() == '/' {
                while self.pos < self.input.len() && self.peek_char() != '\n' {
                    self.next_char();
                }
            } else if c == '/' && self.peek_second() == '*' {
                let start = self.position();
                self.next_char();
                self.next_char();
                loop {
                    if self.pos >= self.input.len() {
                        return Err(ParseError::new(start, "'*/'", "end of input"));
                    }
                    if self.peek_char() == '*' && self.peek_second() == '/' {
                        self.next_char();
                        self.next_char();
                        break;
                    }
                    self.next_char();
                }
            } else {
                return Ok(());
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;

        let start = self.position();
        let c = self.peek_char();

        if c == '\0' {
            return Ok(self.token(TokenKind::Eof, String::new(), start));
        }

        if c.is_alphabetic() || c == '_' {
            let word = self.lex_word();
            let kind = keyword_kind(&word).unwrap_or(TokenKind::Ident);
            return Ok(self.token(kind, word, start));
        }

        if c == '-' && self.peek_second() == '>' {
            self.next_char();
            self.next_char();
            return Ok(self.token(TokenKind::Arrow, "->".into(), start));
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            other => {
                return Err(ParseError::new(
                    start,
                    "a token",
                    &format!("'{}'", other),
                ));
            }
        };
        self.next_char();
        Ok(self.token(kind, c.to_string(), start))
    }

    fn lex_word(&mut self) -> String {
        let mut word = String::new();
        loop {
            let c = self.peek_char();
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.next_char();
            } else {
                return word;
            }
        }
    }

    fn token(&self, kind: TokenKind, text: String, start: Position) -> Token {
        Token {
            kind,
            text,
            span: Span::new(start, self.position()),
        }
    }
}

fn keyword_kind(word: &str) -> Option<TokenKind> {
    match word {
        "module" => Some(TokenKind::Module),
        "import" => Some(TokenKind::Import),
        "global" => Some(TokenKind::Global),
        "protocol" => Some(TokenKind::Protocol),
        "role" => Some(TokenKind::Role),
        "from" => Some(TokenKind::From),
        "to" => Some(TokenKind::To),
        "choice" => Some(TokenKind::Choice),
        "at" => Some(TokenKind::At),
        "or" => Some(TokenKind::Or),
        "par" => Some(TokenKind::Par),
        "and" => Some(TokenKind::And),
        "rec" => Some(TokenKind::Rec),
        "continue" => Some(TokenKind::Continue),
        "do" => Some(TokenKind::Do),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_message() {
        let toks = kinds("Req(Int) from C to S;");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::From,
                TokenKind::Ident,
                TokenKind::To,
                TokenKind::Ident,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_arrow() {
        let toks = kinds("A->B: M1();");
        assert!(toks.contains(&TokenKind::Arrow));
        assert!(toks.contains(&TokenKind::Colon));
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = tokenize("role A\nrole B").unwrap();
        assert_eq!(tokens[2].span.start.line, 2);
        assert_eq!(tokens[2].span.start.column, 1);
    }

    #[test]
    fn test_comments_skipped() {
        let toks = kinds("// line comment\n/* block\ncomment */ rec Loop");
        assert_eq!(toks, vec![TokenKind::Rec, TokenKind::Ident, TokenKind::Eof]);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("/* oops").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.expected.contains("*/"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("Req @ S").unwrap_err();
        assert_eq!(err.found, "'@'");
    }
}
