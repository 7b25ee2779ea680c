//! Constraint relations evaluated against candidate assignments.

use std::collections::HashMap;
use std::fmt;

use super::Expr;

/// Tolerance used for (in)equality of evaluated sides.
const EPSILON: f64 = 1e-9;

/// Comparison operator of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "\\neq",
            Self::Lt => "<",
            Self::Le => "\\leq",
            Self::Gt => ">",
            Self::Ge => "\\geq",
        };
        f.write_str(s)
    }
}

/// A relation `lhs OP rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub lhs: Expr,
    pub op: RelOp,
    pub rhs: Expr,
}

impl Relation {
    /// Check the relation under the given bindings.
    ///
    /// A side that cannot be evaluated (unbound symbol, division by zero)
    /// makes the relation unsatisfied.
    pub fn holds(&self, bindings: &HashMap<String, Expr>) -> bool {
        let (Some(lhs), Some(rhs)) = (
            self.lhs.substitute(bindings).evaluate(),
            self.rhs.substitute(bindings).evaluate(),
        ) else {
            return false;
        };

        let diff = lhs - rhs;
        match self.op {
            RelOp::Eq => diff.abs() < EPSILON,
            RelOp::Ne => diff.abs() >= EPSILON,
            RelOp::Lt => diff <= -EPSILON,
            RelOp::Le => diff < EPSILON,
            RelOp::Gt => diff >= EPSILON,
            RelOp::Ge => diff > -EPSILON,
        }
    }

    /// Symbols referenced on either side.
    pub fn symbols(&self) -> std::collections::BTreeSet<String> {
        let mut symbols = self.lhs.symbols();
        symbols.extend(self.rhs.symbols());
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::parse_relation;

    fn bind(pairs: &[(&str, i64)]) -> HashMap<String, Expr> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), Expr::num(*value)))
            .collect()
    }

    #[test]
    fn test_relation_holds() {
        let relation = parse_relation("a \\neq b").unwrap();
        assert!(relation.holds(&bind(&[("a", 1), ("b", 2)])));
        assert!(!relation.holds(&bind(&[("a", 2), ("b", 2)])));

        let relation = parse_relation("\\frac{a}{b} = 2").unwrap();
        assert!(relation.holds(&bind(&[("a", 4), ("b", 2)])));
        assert!(!relation.holds(&bind(&[("a", 4), ("b", 0)])));
    }

    #[test]
    fn test_ordering_operators() {
        let bindings = bind(&[("a", 3)]);
        assert!(parse_relation("a > 2").unwrap().holds(&bindings));
        assert!(parse_relation("a >= 3").unwrap().holds(&bindings));
        assert!(!parse_relation("a < 3").unwrap().holds(&bindings));
        assert!(parse_relation("a \\le 3").unwrap().holds(&bindings));
    }

    #[test]
    fn test_unbound_symbol_never_holds() {
        let relation = parse_relation("a + x > 0").unwrap();
        assert!(!relation.holds(&bind(&[("a", 3)])));
        assert_eq!(relation.symbols().len(), 2);
    }
}
