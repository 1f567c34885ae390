//! The lexer (§4.1).
//!
//! Tokenizes UTF-8 source text into a flat, arena-backed sequence terminated
//! by a synthetic `Eof` token. Comments start with `@` and run to end of
//! line. At each position the lexer tries, in order: a numeric literal
//! (which must be followed by a currency operator), a longest-match against
//! the fixed operator lexeme table, then an identifier (bare or
//! quote-delimited).

use log::trace;

use crate::common::{Arena, Id, SourcePos};
use crate::entity_ref;
use crate::error::{Error, Result};
use crate::front::name_table::NameTable;
use crate::front::ops::Op;

entity_ref!(TokenId);

/// A `$`-suffixed literal is multiplied by this constant to convert it into
/// the program's base currency unit (rubles), per §4.1 rule 1.
pub const DOLLAR_TO_RUBLE: f64 = 35.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Identifier(crate::front::name_table::NameId),
    Operator(Op),
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

pub struct TokenStream {
    tokens: Arena<TokenId, Token>,
}

impl TokenStream {
    pub fn get(&self, id: TokenId) -> &Token {
        &self.tokens[id]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = TokenId> {
        (0..self.tokens.len()).map(TokenId::new)
    }
}

struct Lexer<'src> {
    input: &'src str,
    pos: usize,
    line: u32,
    col: u32,
    file: Id,
}

impl<'src> Lexer<'src> {
    fn new(input: &'src str, file: Id) -> Self {
        Lexer {
            input,
            pos: 0,
            line: 1,
            col: 1,
            file,
        }
    }

    fn source_pos(&self) -> SourcePos {
        SourcePos::new(self.file, self.line, self.col)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('@') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn rest(&self) -> &'src str {
        &self.input[self.pos..]
    }

    fn end_of_input(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn try_number(&mut self) -> Option<Result<(f64, SourcePos)>> {
        let start_pos = self.source_pos();
        let rest = self.rest();
        let mut iter = rest.char_indices().peekable();
        let first = iter.peek().map(|&(_, c)| c)?;
        if !first.is_ascii_digit() {
            return None;
        }

        let mut end = 0usize;
        while let Some(&(i, c)) = iter.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        if let Some(&(i, '.')) = iter.peek() {
            let mut look = iter.clone();
            look.next();
            if matches!(look.peek(), Some((_, c)) if c.is_ascii_digit()) {
                end = i + 1;
                iter.next();
                while let Some(&(i, c)) = iter.peek() {
                    if c.is_ascii_digit() {
                        end = i + c.len_utf8();
                        iter.next();
                    } else {
                        break;
                    }
                }
            }
        }
        if let Some(&(i, e)) = iter.peek() {
            if e == 'e' || e == 'E' {
                let mut look = iter.clone();
                look.next();
                let mut j = i + 1;
                if let Some(&(_, sign)) = look.peek() {
                    if sign == '+' || sign == '-' {
                        look.next();
                        j += 1;
                    }
                }
                if matches!(look.peek(), Some((_, c)) if c.is_ascii_digit()) {
                    end = j;
                    while let Some(&(k, c)) = look.peek() {
                        if c.is_ascii_digit() {
                            end = k + c.len_utf8();
                            look.next();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        let literal = &rest[..end];
        let value = match literal.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                return Some(Err(Error::Lex {
                    pos: start_pos,
                    message: format!("could not parse numeric literal `{literal}`"),
                }))
            }
        };
        for _ in 0..literal.chars().count() {
            self.advance();
        }
        Some(Ok((value, start_pos)))
    }

    fn try_operator(&mut self) -> Option<(Op, SourcePos)> {
        let start_pos = self.source_pos();
        let rest = self.rest();
        let mut best: Option<Op> = None;
        for &op in Op::LEXER_TABLE {
            let lex = op.descriptor().lexeme;
            if lex.is_empty() || !rest.starts_with(lex) {
                continue;
            }
            if lex.chars().next().unwrap().is_alphabetic() {
                let after = &rest[lex.len()..];
                if after
                    .chars()
                    .next()
                    .map(|c| c.is_alphanumeric() || c == '_')
                    .unwrap_or(false)
                {
                    continue;
                }
            }
            let better = match best {
                None => true,
                Some(b) => lex.len() > b.descriptor().lexeme.len(),
            };
            if better {
                best = Some(op);
            }
        }
        let op = best?;
        for _ in 0..op.descriptor().lexeme.chars().count() {
            self.advance();
        }
        Some((op, start_pos))
    }

    fn try_identifier(&mut self) -> Option<(String, SourcePos)> {
        let start_pos = self.source_pos();
        let c = self.peek_char()?;
        if !(c.is_alphabetic() || c == '_') {
            return None;
        }
        let mut s = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Some((s, start_pos))
    }

    fn quoted_identifier(&mut self) -> Result<(String, SourcePos)> {
        let start_pos = self.source_pos();
        let mut s = String::new();
        loop {
            match self.peek_char() {
                None => {
                    return Err(Error::Lex {
                        pos: start_pos,
                        message: "unterminated quoted identifier".into(),
                    })
                }
                Some('"') => break,
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok((s, start_pos))
    }
}

/// Lex `input` (from logical file `file`) into a flat token stream,
/// interning every identifier into `names`.
pub fn lex(input: &str, file: Id, names: &mut NameTable, max_tokens: usize) -> Result<TokenStream> {
    let mut lx = Lexer::new(input, file);
    let mut tokens: Arena<TokenId, Token> = Arena::with_capacity(max_tokens);
    let mut prev_was_quote = false;
    let mut in_string = false;

    loop {
        lx.skip_trivia();
        if lx.end_of_input() {
            let pos = lx.source_pos();
            push_token(&mut tokens, TokenKind::Operator(Op::Eof), pos)?;
            break;
        }

        if prev_was_quote {
            let (text, pos) = lx.quoted_identifier()?;
            let id = names.insert(internment::Intern::new(text))?;
            push_token(&mut tokens, TokenKind::Identifier(id), pos.clone())?;
            trace!("{pos}: quoted identifier token");
            prev_was_quote = false;
            continue;
        }

        if let Some(result) = lx.try_number() {
            let (mut value, pos) = result?;
            lx.skip_trivia();
            match lx.try_operator() {
                Some((Op::Dollar, _)) => value *= DOLLAR_TO_RUBLE,
                Some((Op::Ruble, _)) => {}
                _ => {
                    return Err(Error::Lex {
                        pos,
                        message: "numeric literal must be followed by a currency unit ($ or \u{20BD})".into(),
                    })
                }
            }
            push_token(&mut tokens, TokenKind::Number(value), pos.clone())?;
            trace!("{pos}: number token {value}");
            continue;
        }

        if let Some((op, pos)) = lx.try_operator() {
            if op == Op::Quote {
                in_string = !in_string;
                prev_was_quote = in_string;
            } else {
                prev_was_quote = false;
            }
            push_token(&mut tokens, TokenKind::Operator(op), pos.clone())?;
            trace!("{pos}: operator token {op}");
            continue;
        }

        if let Some((text, pos)) = lx.try_identifier() {
            let id = names.insert(internment::Intern::new(text))?;
            push_token(&mut tokens, TokenKind::Identifier(id), pos.clone())?;
            trace!("{pos}: identifier token");
            continue;
        }

        let pos = lx.source_pos();
        let offending = lx.peek_char().map(|c| c.to_string()).unwrap_or_default();
        return Err(Error::Lex {
            pos,
            message: format!("unexpected character {offending:?}"),
        });
    }

    Ok(TokenStream { tokens })
}

fn push_token(tokens: &mut Arena<TokenId, Token>, kind: TokenKind, pos: SourcePos) -> Result<TokenId> {
    tokens
        .try_push(Token { kind, pos })
        .ok_or(Error::ArenaOverflow { what: "token stream", capacity: tokens.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_str(s: &str) -> (TokenStream, NameTable) {
        let mut names = NameTable::new(256, 2048);
        let file = internment::Intern::new("test.mn".to_string());
        let toks = lex(s, file, &mut names, 1024).unwrap();
        (toks, names)
    }

    #[test]
    fn dollar_conversion() {
        let (toks, _) = lex_str("2$");
        let t = toks.get(TokenId::new(0));
        assert_eq!(t.kind, TokenKind::Number(70.0));
    }

    #[test]
    fn ruble_passthrough() {
        let (toks, _) = lex_str("5\u{20BD}");
        let t = toks.get(TokenId::new(0));
        assert_eq!(t.kind, TokenKind::Number(5.0));
    }

    #[test]
    fn longest_match_comparisons() {
        let (toks, _) = lex_str("<=");
        let t = toks.get(TokenId::new(0));
        assert_eq!(t.kind, TokenKind::Operator(Op::Le));
    }

    #[test]
    fn keyword_boundary() {
        let (toks, names) = lex_str("Accountant");
        let t = toks.get(TokenId::new(0));
        match t.kind {
            TokenKind::Identifier(id) => assert_eq!(names.get(id).name.as_str(), "Accountant"),
            other => panic!("expected identifier, got {other:?}"),
        }
    }

    #[test]
    fn number_requires_currency() {
        let mut names = NameTable::new(256, 2048);
        let file = internment::Intern::new("test.mn".to_string());
        let err = lex("3 +", file, &mut names, 1024).unwrap_err();
        assert!(matches!(err, Error::Lex { .. }));
    }

    #[test]
    fn comment_is_skipped() {
        let (toks, _) = lex_str("@ a comment\n5\u{20BD}");
        let t = toks.get(TokenId::new(0));
        assert_eq!(t.kind, TokenKind::Number(5.0));
    }
}
