//! Reader for LaTeX-flavoured expression source.
//!
//! Single letters are separate symbols (`xy` is `x*y`), juxtaposition is
//! multiplication, `\times`, `\cdot` and `*` are explicit multiplication and
//! unknown commands such as `\alpha` are read as symbols.

use std::fmt;

use super::relation::{RelOp, Relation};
use super::Expr;

/// A syntax error with the character position where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at position {position}")]
pub struct SyntaxError {
    pub message: String,
    pub position: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Frac,
    Rel(RelOp),
}

impl Token {
    fn starts_primary(&self) -> bool {
        matches!(
            self,
            Token::Num(_) | Token::Ident(_) | Token::LParen | Token::LBrace | Token::Frac
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{}", n),
            Token::Ident(name) => write!(f, "{}", name),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Caret => f.write_str("^"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBrace => f.write_str("{"),
            Token::RBrace => f.write_str("}"),
            Token::Frac => f.write_str("\\frac"),
            Token::Rel(op) => write!(f, "{}", op),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, SyntaxError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let start = i;
        let c = chars[i];
        i += 1;

        let token = match c {
            c if c.is_whitespace() => continue,
            '0'..='9' => {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| SyntaxError::new(format!("number {} is too large", digits), start))?;
                Token::Num(value)
            }
            c if c.is_alphabetic() => Token::Ident(c.to_string()),
            '\\' => {
                let name_start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                if i == name_start {
                    // Escaped punctuation: spacing commands are dropped.
                    let Some(&escaped) = chars.get(i) else {
                        return Err(SyntaxError::new("dangling backslash", start));
                    };
                    i += 1;
                    match escaped {
                        ',' | ';' | ':' | '!' | ' ' => continue,
                        '{' => Token::LParen,
                        '}' => Token::RParen,
                        other => {
                            return Err(SyntaxError::new(
                                format!("unknown escape '\\{}'", other),
                                start,
                            ))
                        }
                    }
                } else {
                    let name: String = chars[name_start..i].iter().collect();
                    match name.as_str() {
                        "times" | "cdot" => Token::Star,
                        "div" => Token::Slash,
                        "frac" | "dfrac" | "tfrac" => Token::Frac,
                        "left" | "right" => continue,
                        "neq" | "ne" => Token::Rel(RelOp::Ne),
                        "le" | "leq" | "leqslant" => Token::Rel(RelOp::Le),
                        "ge" | "geq" | "geqslant" => Token::Rel(RelOp::Ge),
                        "lt" => Token::Rel(RelOp::Lt),
                        "gt" => Token::Rel(RelOp::Gt),
                        _ => Token::Ident(format!("\\{}", name)),
                    }
                }
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' | '[' => Token::LParen,
            ')' | ']' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '=' => Token::Rel(RelOp::Eq),
            '<' | '>' | '!' => {
                let followed_by_eq = chars.get(i) == Some(&'=');
                if followed_by_eq {
                    i += 1;
                }
                match (c, followed_by_eq) {
                    ('<', true) => Token::Rel(RelOp::Le),
                    ('<', false) => Token::Rel(RelOp::Lt),
                    ('>', true) => Token::Rel(RelOp::Ge),
                    ('>', false) => Token::Rel(RelOp::Gt),
                    ('!', true) => Token::Rel(RelOp::Ne),
                    _ => return Err(SyntaxError::new("unexpected character '!'", start)),
                }
            }
            other => {
                return Err(SyntaxError::new(
                    format!("unexpected character '{}'", other),
                    start,
                ))
            }
        };
        tokens.push((token, start));
    }

    Ok(tokens)
}

/// Deepest nesting of groups, signs, exponents and divisions the parser accepts.
///
/// Every later tree walk is recursive, so this also bounds their stack use.
pub const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, SyntaxError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
            end: src.chars().count(),
            depth: 0,
        })
    }

    fn descend(&mut self) -> Result<(), SyntaxError> {
        if self.depth >= MAX_DEPTH {
            return Err(SyntaxError::new("expression is nested too deeply", self.position()));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, at)| *at)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            Some(token) => SyntaxError::new(format!("unexpected '{}'", token), self.position()),
            None => SyntaxError::new("unexpected end of input", self.end),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(match self.peek() {
                Some(found) => SyntaxError::new(
                    format!("expected '{}' but found '{}'", expected, found),
                    self.position(),
                ),
                None => SyntaxError::new(format!("expected '{}'", expected), self.end),
            })
        }
    }

    fn finish(&self) -> Result<(), SyntaxError> {
        if self.pos < self.tokens.len() {
            Err(self.unexpected())
        } else {
            Ok(())
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, SyntaxError> {
        let mut terms = vec![self.parse_product()?];
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    terms.push(self.parse_product()?);
                }
                Some(Token::Minus) => {
                    self.advance();
                    terms.push(Expr::neg(self.parse_product()?));
                }
                _ => break,
            }
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Add(terms)
        })
    }

    fn parse_product(&mut self) -> Result<Expr, SyntaxError> {
        let depth = self.depth;
        let mut factors = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    factors.push(self.parse_unary()?);
                }
                Some(Token::Slash) => {
                    // Each division nests the product so far one level deeper.
                    self.descend()?;
                    self.advance();
                    let denominator = self.parse_unary()?;
                    let numerator = product_of(std::mem::take(&mut factors));
                    factors.push(Expr::div(numerator, denominator));
                }
                Some(token) if token.starts_primary() => factors.push(self.parse_power()?),
                _ => break,
            }
        }
        self.depth = depth;
        Ok(product_of(factors))
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        while self.peek() == Some(&Token::Plus) {
            self.advance();
        }
        if self.peek() != Some(&Token::Minus) {
            return self.parse_power();
        }
        self.descend()?;
        self.advance();
        let inner = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::neg(inner))
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_primary()?;
        if self.peek() != Some(&Token::Caret) {
            return Ok(base);
        }
        self.descend()?;
        self.advance();
        let exponent = self.parse_exponent()?;
        self.depth -= 1;
        Ok(Expr::pow(base, exponent))
    }

    fn parse_exponent(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == Some(&Token::Minus) {
            self.descend()?;
            self.advance();
            let inner = self.parse_exponent()?;
            self.depth -= 1;
            return Ok(Expr::neg(inner));
        }
        self.parse_power()
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let at = self.position();
        let group = matches!(
            self.peek(),
            Some(Token::LParen) | Some(Token::LBrace) | Some(Token::Frac)
        );
        if group {
            self.descend()?;
        }
        let expr = match self.advance() {
            Some(Token::Num(n)) => Expr::Num(n),
            Some(Token::Ident(name)) => Expr::Sym(name),
            Some(Token::LParen) => {
                let inner = self.parse_sum()?;
                self.expect(Token::RParen)?;
                inner
            }
            Some(Token::LBrace) => {
                let inner = self.parse_sum()?;
                self.expect(Token::RBrace)?;
                inner
            }
            Some(Token::Frac) => {
                self.expect(Token::LBrace)?;
                let numerator = self.parse_sum()?;
                self.expect(Token::RBrace)?;
                self.expect(Token::LBrace)?;
                let denominator = self.parse_sum()?;
                self.expect(Token::RBrace)?;
                Expr::div(numerator, denominator)
            }
            Some(token) => return Err(SyntaxError::new(format!("unexpected '{}'", token), at)),
            None => return Err(SyntaxError::new("unexpected end of input", self.end)),
        };
        if group {
            self.depth -= 1;
        }
        Ok(expr)
    }
}

fn product_of(mut factors: Vec<Expr>) -> Expr {
    if factors.len() == 1 {
        factors.remove(0)
    } else {
        Expr::Mul(factors)
    }
}

/// Parse a single expression.
pub fn parse_expression(src: &str) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(src)?;
    if parser.tokens.is_empty() {
        return Err(SyntaxError::new("empty expression", 0));
    }
    let expr = parser.parse_sum()?;
    parser.finish()?;
    Ok(expr)
}

/// Parse a relation `lhs OP rhs`.
pub fn parse_relation(src: &str) -> Result<Relation, SyntaxError> {
    let mut parser = Parser::new(src)?;
    if parser.tokens.is_empty() {
        return Err(SyntaxError::new("empty relation", 0));
    }
    let lhs = parser.parse_sum()?;
    let op = match parser.advance() {
        Some(Token::Rel(op)) => op,
        Some(token) => {
            return Err(SyntaxError::new(
                format!("expected a comparison but found '{}'", token),
                parser.tokens[parser.pos - 1].1,
            ))
        }
        None => return Err(SyntaxError::new("expected a comparison", parser.end)),
    };
    let rhs = parser.parse_sum()?;
    parser.finish()?;
    Ok(Relation { lhs, op, rhs })
}
