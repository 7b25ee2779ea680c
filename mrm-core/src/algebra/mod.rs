//! Expression algebra used by the built-in engine.
//!
//! Expressions are small immutable trees. The reader in [`parser`] accepts the
//! LaTeX-flavoured input produced by the front-end editor (`2x^{2}`,
//! `\frac{a}{b}`, `a\times b`, `\alpha`), [`simplify`] normalises a tree, and
//! [`relation`] evaluates the constraint relations used during generation.

mod parser;
mod relation;
mod simplify;

pub use parser::{parse_expression, parse_relation, SyntaxError};
pub use relation::{RelOp, Relation};

use std::collections::{BTreeSet, HashMap};

/// An algebraic expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Integer literal
    Num(i64),
    /// Free symbol (`x`, `\alpha`)
    Sym(String),
    /// Unary negation
    Neg(Box<Expr>),
    /// Sum of terms, in production order
    Add(Vec<Expr>),
    /// Product of factors, in production order
    Mul(Vec<Expr>),
    /// Fraction
    Div(Box<Expr>, Box<Expr>),
    /// Power
    Pow(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Create an integer literal.
    pub fn num(value: i64) -> Self {
        Self::Num(value)
    }

    /// Create a symbol.
    pub fn sym(name: impl Into<String>) -> Self {
        Self::Sym(name.into())
    }

    /// Negate an expression.
    pub fn neg(inner: Expr) -> Self {
        Self::Neg(Box::new(inner))
    }

    /// Create a fraction.
    pub fn div(numerator: Expr, denominator: Expr) -> Self {
        Self::Div(Box::new(numerator), Box::new(denominator))
    }

    /// Create a power.
    pub fn pow(base: Expr, exponent: Expr) -> Self {
        Self::Pow(Box::new(base), Box::new(exponent))
    }

    /// Whether this is the literal zero (possibly negated).
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Num(n) => *n == 0,
            Self::Neg(inner) => inner.is_zero(),
            _ => false,
        }
    }

    /// Whether this is the literal one.
    pub fn is_one(&self) -> bool {
        matches!(self, Self::Num(1))
    }

    /// Whether this is a numeric literal, optionally negated.
    pub fn is_numeric_literal(&self) -> bool {
        match self {
            Self::Num(_) => true,
            Self::Neg(inner) => inner.is_numeric_literal(),
            _ => false,
        }
    }

    /// Collect the distinct free symbols of the expression.
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Num(_) => {}
            Self::Sym(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_symbols(out),
            Self::Add(items) | Self::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Self::Div(a, b) | Self::Pow(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    /// Replace symbols by the bound expressions. Unbound symbols are kept.
    pub fn substitute(&self, bindings: &HashMap<String, Expr>) -> Expr {
        match self {
            Self::Num(_) => self.clone(),
            Self::Sym(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Self::Neg(inner) => Self::neg(inner.substitute(bindings)),
            Self::Add(items) => Self::Add(items.iter().map(|e| e.substitute(bindings)).collect()),
            Self::Mul(items) => Self::Mul(items.iter().map(|e| e.substitute(bindings)).collect()),
            Self::Div(a, b) => Self::div(a.substitute(bindings), b.substitute(bindings)),
            Self::Pow(a, b) => Self::pow(a.substitute(bindings), b.substitute(bindings)),
        }
    }

    /// Evaluate numerically. Returns `None` for unbound symbols, division by
    /// zero and non-finite results.
    pub fn evaluate(&self) -> Option<f64> {
        let value = match self {
            Self::Num(n) => *n as f64,
            Self::Sym(_) => return None,
            Self::Neg(inner) => -inner.evaluate()?,
            Self::Add(items) => {
                let mut acc = 0.0;
                for item in items {
                    acc += item.evaluate()?;
                }
                acc
            }
            Self::Mul(items) => {
                let mut acc = 1.0;
                for item in items {
                    acc *= item.evaluate()?;
                }
                acc
            }
            Self::Div(a, b) => {
                let denominator = b.evaluate()?;
                if denominator == 0.0 {
                    return None;
                }
                a.evaluate()? / denominator
            }
            Self::Pow(a, b) => a.evaluate()?.powf(b.evaluate()?),
        };
        value.is_finite().then_some(value)
    }

    /// Simplify the expression. See [`simplify`] for the rules applied.
    pub fn simplify(&self) -> Expr {
        simplify::simplify(self)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_are_deduplicated() {
        let expr = parse_expression("x+2xy-y^{x}").unwrap();
        let symbols: Vec<_> = expr.symbols().into_iter().collect();
        assert_eq!(symbols, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_substitute_keeps_unbound_symbols() {
        let expr = parse_expression("ax+b").unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), Expr::num(3));
        bindings.insert("b".to_string(), Expr::num(-1));

        let substituted = expr.substitute(&bindings);
        assert_eq!(substituted.symbols().len(), 1);
        assert!(substituted.symbols().contains("x"));
    }

    #[test]
    fn test_evaluate() {
        let expr = parse_expression("\\frac{6}{3}+2^{3}-1").unwrap();
        assert_eq!(expr.evaluate(), Some(9.0));

        assert_eq!(parse_expression("\\frac{1}{0}").unwrap().evaluate(), None);
        assert_eq!(parse_expression("x+1").unwrap().evaluate(), None);
    }

    #[test]
    fn test_is_zero() {
        assert!(Expr::num(0).is_zero());
        assert!(Expr::neg(Expr::num(0)).is_zero());
        assert!(!Expr::sym("x").is_zero());
    }
}
