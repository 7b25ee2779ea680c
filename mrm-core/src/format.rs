//! Rendering of expressions into host-displayable LaTeX.
//!
//! Formatting is two passes: [`Formatter::beautify`] canonicalises the tree
//! according to the [`FormattingConfig`] (zero terms, unit coefficients,
//! chained negatives, term order) and [`Formatter::render`] turns it into text
//! (multiplication symbol, parenthesisation of negatives).

use serde::{Deserialize, Serialize};

use crate::algebra::Expr;

/// Options controlling how an expression becomes text.
///
/// The camelCase names are canonical; the short names used by the original
/// front-end are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingConfig {
    /// Symbol placed between numeric factors (`\times`, `\cdot`, `*`)
    #[serde(alias = "multSymbol")]
    pub multiplication_symbol: String,
    /// Render negative terms and factors as `(-t)`
    #[serde(alias = "negativeParenthesis")]
    pub parenthesize_negatives: bool,
    /// Keep a coefficient of `1` (`1x` instead of `x`)
    #[serde(alias = "printOneMult")]
    pub print_explicit_unit_coefficient: bool,
    /// Keep additive zero terms (`x+0` instead of `x`)
    #[serde(alias = "printZeroAdd")]
    pub print_zero_additive_terms: bool,
    /// Rewrite `-(-x)` as `x`
    #[serde(alias = "collapseNegatives")]
    pub collapse_chained_negatives: bool,
    /// Sort terms and factors lexically instead of keeping production order
    #[serde(alias = "lexicalOrder")]
    pub use_lexical_term_order: bool,
}

impl Default for FormattingConfig {
    /// The fixed configuration used by the parse entry point.
    fn default() -> Self {
        Self {
            multiplication_symbol: "\\times".to_string(),
            parenthesize_negatives: false,
            print_explicit_unit_coefficient: false,
            print_zero_additive_terms: false,
            collapse_chained_negatives: true,
            use_lexical_term_order: false,
        }
    }
}

impl FormattingConfig {
    /// Set the multiplication symbol.
    pub fn with_multiplication_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.multiplication_symbol = symbol.into();
        self
    }

    /// Enable or disable parenthesised negatives.
    pub fn with_parenthesize_negatives(mut self, enabled: bool) -> Self {
        self.parenthesize_negatives = enabled;
        self
    }

    /// Enable or disable explicit unit coefficients.
    pub fn with_explicit_unit_coefficient(mut self, enabled: bool) -> Self {
        self.print_explicit_unit_coefficient = enabled;
        self
    }

    /// Enable or disable additive zero terms.
    pub fn with_zero_additive_terms(mut self, enabled: bool) -> Self {
        self.print_zero_additive_terms = enabled;
        self
    }

    /// Enable or disable collapsing of chained negatives.
    pub fn with_collapse_chained_negatives(mut self, enabled: bool) -> Self {
        self.collapse_chained_negatives = enabled;
        self
    }

    /// Enable or disable lexical term order.
    pub fn with_lexical_term_order(mut self, enabled: bool) -> Self {
        self.use_lexical_term_order = enabled;
        self
    }
}

/// Formats expressions with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    config: FormattingConfig,
}

impl Formatter {
    /// Create a formatter for the given configuration.
    pub fn new(config: FormattingConfig) -> Self {
        Self { config }
    }

    /// The configuration this formatter applies.
    pub fn config(&self) -> &FormattingConfig {
        &self.config
    }

    /// Beautify then render.
    pub fn format(&self, expr: &Expr) -> String {
        self.render(&self.beautify(expr))
    }

    /// Format every expression of a batch, keeping order.
    pub fn format_all<'a>(&self, exprs: impl IntoIterator<Item = &'a Expr>) -> Vec<String> {
        exprs.into_iter().map(|e| self.format(e)).collect()
    }

    /// Canonicalise term order and sign placement.
    pub fn beautify(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::Num(_) | Expr::Sym(_) => expr.clone(),
            Expr::Neg(inner) => self.beautify_negation(self.beautify(inner)),
            Expr::Add(terms) => self.beautify_sum(terms),
            Expr::Mul(factors) => self.beautify_product(factors),
            Expr::Div(a, b) => Expr::div(self.beautify(a), self.beautify(b)),
            Expr::Pow(a, b) => Expr::pow(self.beautify(a), self.beautify(b)),
        }
    }

    fn beautify_negation(&self, inner: Expr) -> Expr {
        if !self.config.collapse_chained_negatives {
            return Expr::neg(inner);
        }
        match inner {
            Expr::Neg(double) => *double,
            Expr::Num(0) => Expr::Num(0),
            Expr::Num(n) if n < 0 => match n.checked_neg() {
                Some(positive) => Expr::Num(positive),
                None => Expr::neg(Expr::Num(n)),
            },
            other => Expr::neg(other),
        }
    }

    fn beautify_sum(&self, terms: &[Expr]) -> Expr {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match self.beautify(term) {
                Expr::Add(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        if !self.config.print_zero_additive_terms {
            flat.retain(|term| !is_zero_term(term));
        }
        if self.config.use_lexical_term_order {
            flat.sort_by_cached_key(lexical_key);
        }

        match flat.len() {
            0 => Expr::Num(0),
            1 => flat.remove(0),
            _ => Expr::Add(flat),
        }
    }

    fn beautify_product(&self, factors: &[Expr]) -> Expr {
        let mut flat = Vec::with_capacity(factors.len());
        for factor in factors {
            match self.beautify(factor) {
                Expr::Mul(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        let mut negated = false;
        if !self.config.print_explicit_unit_coefficient && flat.len() > 1 {
            let before = flat.len();
            flat.retain(|factor| !is_minus_one(factor));
            negated = (before - flat.len()) % 2 == 1;
            flat.retain(|factor| !factor.is_one());
        }
        if self.config.use_lexical_term_order {
            flat.sort_by_cached_key(|factor| (!factor.is_numeric_literal(), lexical_key(factor)));
        }

        let product = match flat.len() {
            0 if negated => return Expr::Num(-1),
            0 => Expr::Num(1),
            1 => flat.remove(0),
            _ => Expr::Mul(flat),
        };
        if negated {
            self.beautify_negation(product)
        } else {
            product
        }
    }

    /// Render a (beautified) expression as LaTeX.
    pub fn render(&self, expr: &Expr) -> String {
        match expr {
            Expr::Num(n) => n.to_string(),
            Expr::Sym(name) => name.clone(),
            Expr::Neg(inner) => format!("-{}", self.render_negated(inner)),
            Expr::Add(terms) => self.render_sum(terms),
            Expr::Mul(factors) => self.render_product(factors),
            Expr::Div(a, b) => format!("\\frac{{{}}}{{{}}}", self.render(a), self.render(b)),
            Expr::Pow(base, exponent) => {
                let base_text = self.render(base);
                let base_text = if needs_parens_as_base(base) {
                    format!("({})", base_text)
                } else {
                    base_text
                };
                format!("{}^{{{}}}", base_text, self.render(exponent))
            }
        }
    }

    fn render_negated(&self, inner: &Expr) -> String {
        let text = self.render(inner);
        match inner {
            Expr::Add(_) | Expr::Neg(_) => format!("({})", text),
            Expr::Num(n) if *n < 0 => format!("({})", text),
            Expr::Mul(factors) if factors.first().is_some_and(is_negative) => format!("({})", text),
            _ => text,
        }
    }

    fn render_sum(&self, terms: &[Expr]) -> String {
        let mut out = String::new();
        for (i, term) in terms.iter().enumerate() {
            if i == 0 {
                out.push_str(&self.render_leading(term));
                continue;
            }
            if is_negative(term) {
                if self.config.parenthesize_negatives {
                    out.push_str(&format!("+({})", self.render(term)));
                } else {
                    match magnitude(term) {
                        Some(positive) => {
                            out.push('-');
                            out.push_str(&self.render_term_magnitude(&positive));
                        }
                        None => {
                            out.push('+');
                            out.push_str(&self.render(term));
                        }
                    }
                }
            } else {
                out.push('+');
                out.push_str(&self.render(term));
            }
        }
        out
    }

    fn render_term_magnitude(&self, term: &Expr) -> String {
        let text = self.render(term);
        match term {
            Expr::Add(_) => format!("({})", text),
            _ => text,
        }
    }

    fn render_leading(&self, expr: &Expr) -> String {
        let text = self.render(expr);
        if self.config.parenthesize_negatives && is_negative(expr) {
            format!("({})", text)
        } else {
            text
        }
    }

    fn render_product(&self, factors: &[Expr]) -> String {
        let mut out = String::new();
        let mut previous: Option<&Expr> = None;

        for (i, factor) in factors.iter().enumerate() {
            let text = self.render(factor);
            let text = match factor {
                Expr::Add(_) => format!("({})", text),
                f if is_negative(f) && (i > 0 || self.config.parenthesize_negatives) => {
                    format!("({})", text)
                }
                _ => text,
            };

            if let Some(prev) = previous {
                if needs_explicit_multiplication(prev, factor) {
                    out.push_str(&self.config.multiplication_symbol);
                    if self.config.multiplication_symbol.starts_with('\\') {
                        out.push(' ');
                    }
                } else if ends_with_command(prev) && text.starts_with(|c: char| c.is_alphabetic()) {
                    out.push(' ');
                }
            }

            out.push_str(&text);
            previous = Some(factor);
        }
        out
    }
}

/// Whether a term contributes nothing to a sum.
fn is_zero_term(term: &Expr) -> bool {
    match term {
        Expr::Mul(factors) => factors.iter().any(Expr::is_zero),
        Expr::Div(numerator, _) => numerator.is_zero(),
        other => other.is_zero(),
    }
}

/// A `-1` factor, either folded or written with a sign.
fn is_minus_one(expr: &Expr) -> bool {
    match expr {
        Expr::Num(n) => *n == -1,
        Expr::Neg(inner) => inner.is_one(),
        _ => false,
    }
}

/// Whether the term renders with a leading minus sign.
fn is_negative(expr: &Expr) -> bool {
    match expr {
        Expr::Num(n) => *n < 0,
        Expr::Neg(_) => true,
        Expr::Mul(factors) => factors.first().is_some_and(is_negative),
        _ => false,
    }
}

/// The term with its leading sign removed, if it has one.
fn magnitude(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Num(n) if *n < 0 => n.checked_neg().map(Expr::Num),
        Expr::Neg(inner) => Some((**inner).clone()),
        Expr::Mul(factors) => {
            let (first, rest) = factors.split_first()?;
            let first = magnitude(first)?;
            let mut factors = Vec::with_capacity(factors.len());
            if !first.is_one() || rest.is_empty() {
                factors.push(first);
            }
            factors.extend(rest.iter().cloned());
            Some(if factors.len() == 1 {
                factors.remove(0)
            } else {
                Expr::Mul(factors)
            })
        }
        _ => None,
    }
}

fn needs_parens_as_base(base: &Expr) -> bool {
    match base {
        Expr::Num(n) => *n < 0,
        Expr::Sym(_) => false,
        _ => true,
    }
}

/// Juxtaposition is ambiguous when the right factor starts with a digit.
fn needs_explicit_multiplication(_left: &Expr, right: &Expr) -> bool {
    match right {
        Expr::Num(_) => true,
        Expr::Neg(inner) => inner.is_numeric_literal(),
        Expr::Pow(base, _) => matches!(**base, Expr::Num(n) if n >= 0),
        _ => false,
    }
}

fn ends_with_command(expr: &Expr) -> bool {
    match expr {
        Expr::Sym(name) => name.starts_with('\\'),
        _ => false,
    }
}

/// Sort key for lexical order: symbolic terms by their first symbol, constants last.
fn lexical_key(expr: &Expr) -> (bool, String) {
    match expr.symbols().into_iter().next() {
        Some(first) => (false, first.trim_start_matches('\\').to_string()),
        None => (true, String::new()),
    }
}
