use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Keyword(&'static str),
    // punctuation / operators
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eof,
}

const KEYWORDS: &[&str] = &[
    "fn", "if", "else", "while", "for", "in", "return", "raise", "try", "except", "as", "break",
    "continue", "pass", "and", "or", "not", "true", "false", "null",
];

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    pub line: usize,
}

pub struct LexedToken {
    pub token: Token,
    pub line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0, line: 1 }
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.pos).unwrap_or(&0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        *self.src.get(self.pos + offset).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'#' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<LexedToken>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let line = self.line;
            if self.peek() == 0 {
                out.push(LexedToken { token: Token::Eof, line });
                break;
            }
            let token = self.next_token()?;
            out.push(LexedToken { token, line });
        }
        Ok(out)
    }

    fn next_token(&mut self) -> Result<Token> {
        let c = self.peek();
        if c.is_ascii_digit() {
            return self.number();
        }
        if c == b'"' || c == b'\'' {
            return self.string(c);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.ident_or_keyword());
        }
        self.advance();
        Ok(match c {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b'.' => Token::Dot,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    Token::NotEq
                } else {
                    return err!(Protocol, "unexpected character '!' at line {}", self.line);
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            other => return err!(Protocol, "unexpected character '{}' at line {}", other as char, self.line),
        })
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if is_float {
            Ok(Token::Float(text.parse().map_err(|_| Error::new(ErrorKind::Protocol, format!("bad float literal {}", text)))?))
        } else {
            Ok(Token::Int(text.parse().map_err(|_| Error::new(ErrorKind::Protocol, format!("bad int literal {}", text)))?))
        }
    }

    fn string(&mut self, quote: u8) -> Result<Token> {
        self.advance();
        let mut s = String::new();
        loop {
            let c = self.peek();
            if c == 0 {
                return err!(Protocol, "unterminated string literal starting at line {}", self.line);
            }
            if c == quote {
                self.advance();
                break;
            }
            if c == b'\\' {
                self.advance();
                let esc = self.advance();
                s.push(match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'\\' => '\\',
                    b'"' => '"',
                    b'\'' => '\'',
                    other => other as char,
                });
                continue;
            }
            s.push(self.advance() as char);
        }
        Ok(Token::Str(s))
    }

    fn ident_or_keyword(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if let Some(&kw) = KEYWORDS.iter().find(|&&k| k == text) {
            Token::Keyword(kw)
        } else {
            Token::Ident(text.to_string())
        }
    }
}
