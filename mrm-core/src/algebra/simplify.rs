//! Algebraic simplification.
//!
//! Rules: flatten nested sums and products, fold integer constants with
//! checked arithmetic (an overflowing fold is left unfolded), collect like
//! terms by their symbolic part, merge equal bases with numeric exponents,
//! `x^0 = 1`, `x^1 = x`, `0x = 0`, and reduce integer fractions.

use super::Expr;

pub(super) fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Num(_) | Expr::Sym(_) => expr.clone(),
        Expr::Neg(inner) => negate(simplify(inner)),
        Expr::Add(items) => simplify_sum(items.iter().map(simplify).collect()),
        Expr::Mul(items) => simplify_product(items.iter().map(simplify).collect()),
        Expr::Div(a, b) => simplify_fraction(simplify(a), simplify(b)),
        Expr::Pow(a, b) => simplify_power(simplify(a), simplify(b)),
    }
}

/// Split a simplified term into its integer coefficient and symbolic factors.
fn split_term(expr: &Expr) -> (i64, Vec<Expr>) {
    match expr {
        Expr::Num(n) => (*n, Vec::new()),
        Expr::Neg(inner) => {
            let (coefficient, rest) = split_term(inner);
            match coefficient.checked_neg() {
                Some(negated) => (negated, rest),
                None => (1, vec![expr.clone()]),
            }
        }
        Expr::Mul(factors) => {
            let mut coefficient: i64 = 1;
            let mut rest = Vec::new();
            for factor in factors {
                match factor {
                    Expr::Num(n) => match coefficient.checked_mul(*n) {
                        Some(product) => coefficient = product,
                        None => rest.push(factor.clone()),
                    },
                    other => rest.push(other.clone()),
                }
            }
            (coefficient, rest)
        }
        other => (1, vec![other.clone()]),
    }
}

fn build_term(coefficient: i64, mut rest: Vec<Expr>) -> Expr {
    if coefficient == 0 {
        return Expr::Num(0);
    }
    if rest.is_empty() {
        return Expr::Num(coefficient);
    }
    let symbolic = if rest.len() == 1 {
        rest.remove(0)
    } else {
        Expr::Mul(rest)
    };
    match coefficient {
        1 => symbolic,
        -1 => Expr::neg(symbolic),
        c => match symbolic {
            Expr::Mul(mut factors) => {
                factors.insert(0, Expr::Num(c));
                Expr::Mul(factors)
            }
            single => Expr::Mul(vec![Expr::Num(c), single]),
        },
    }
}

fn negate(expr: Expr) -> Expr {
    let (coefficient, rest) = split_term(&expr);
    match coefficient.checked_neg() {
        Some(negated) => build_term(negated, rest),
        None => Expr::neg(expr),
    }
}

fn simplify_sum(terms: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(terms.len());
    for term in terms {
        match term {
            Expr::Add(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    let mut groups: Vec<(Vec<Expr>, i64)> = Vec::new();
    for term in &flat {
        let (coefficient, rest) = split_term(term);
        let merged = groups
            .iter_mut()
            .find(|(key, _)| *key == rest)
            .and_then(|(_, total)| total.checked_add(coefficient).map(|sum| *total = sum));
        if merged.is_none() {
            groups.push((rest, coefficient));
        }
    }

    let mut result: Vec<Expr> = groups
        .into_iter()
        .filter(|(_, coefficient)| *coefficient != 0)
        .map(|(rest, coefficient)| build_term(coefficient, rest))
        .collect();

    match result.len() {
        0 => Expr::Num(0),
        1 => result.remove(0),
        _ => Expr::Add(result),
    }
}

fn simplify_product(factors: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(factors.len());
    for factor in factors {
        match factor {
            Expr::Mul(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    if flat.iter().any(Expr::is_zero) {
        return Expr::Num(0);
    }

    let mut coefficient: i64 = 1;
    let mut powers: Vec<(Expr, Expr)> = Vec::new();
    let mut unfolded = Vec::new();

    for factor in flat {
        let (sign, factor) = match factor {
            Expr::Neg(inner) => (-1, *inner),
            other => (1, other),
        };
        if sign < 0 {
            match coefficient.checked_neg() {
                Some(negated) => coefficient = negated,
                None => unfolded.push(Expr::Num(-1)),
            }
        }
        match factor {
            Expr::Num(n) => match coefficient.checked_mul(n) {
                Some(product) => coefficient = product,
                None => unfolded.push(Expr::Num(n)),
            },
            Expr::Pow(base, exponent) => merge_power(&mut powers, *base, *exponent),
            other => merge_power(&mut powers, other, Expr::Num(1)),
        }
    }

    let mut rest: Vec<Expr> = unfolded;
    for (base, exponent) in powers {
        match simplify_power(base, exponent) {
            Expr::Num(1) => {}
            Expr::Num(n) => match coefficient.checked_mul(n) {
                Some(product) => coefficient = product,
                None => rest.push(Expr::Num(n)),
            },
            other => rest.push(other),
        }
    }

    build_term(coefficient, rest)
}

fn merge_power(powers: &mut Vec<(Expr, Expr)>, base: Expr, exponent: Expr) {
    for (existing_base, existing_exponent) in powers.iter_mut() {
        if *existing_base != base {
            continue;
        }
        if let (Expr::Num(a), Expr::Num(b)) = (&*existing_exponent, &exponent) {
            if let Some(sum) = a.checked_add(*b) {
                *existing_exponent = Expr::Num(sum);
                return;
            }
        }
    }
    powers.push((base, exponent));
}

fn simplify_power(base: Expr, exponent: Expr) -> Expr {
    match (&base, &exponent) {
        (_, Expr::Num(0)) => Expr::Num(1),
        (_, Expr::Num(1)) => base,
        (Expr::Num(1), _) => Expr::Num(1),
        (Expr::Num(0), Expr::Num(e)) if *e > 0 => Expr::Num(0),
        (Expr::Num(b), Expr::Num(e)) if (0..=u32::MAX as i64).contains(e) => b
            .checked_pow(*e as u32)
            .map(Expr::Num)
            .unwrap_or_else(|| Expr::pow(base.clone(), exponent.clone())),
        (Expr::Pow(inner_base, inner_exponent), Expr::Num(e)) => match &**inner_exponent {
            Expr::Num(inner) => match inner.checked_mul(*e) {
                Some(product) => simplify_power((**inner_base).clone(), Expr::Num(product)),
                None => Expr::pow(base.clone(), exponent.clone()),
            },
            _ => Expr::pow(base.clone(), exponent.clone()),
        },
        _ => Expr::pow(base, exponent),
    }
}

fn simplify_fraction(numerator: Expr, denominator: Expr) -> Expr {
    if denominator.is_one() {
        return numerator;
    }
    if denominator.is_zero() {
        return Expr::div(numerator, denominator);
    }
    if numerator.is_zero() {
        return Expr::Num(0);
    }

    if let (Expr::Num(a), Expr::Num(b)) = (&numerator, &denominator) {
        let divisor = gcd(*a, *b);
        let (mut a, mut b) = (a / divisor, b / divisor);
        if b < 0 {
            match (a.checked_neg(), b.checked_neg()) {
                (Some(na), Some(nb)) => {
                    a = na;
                    b = nb;
                }
                _ => return Expr::div(Expr::Num(a), Expr::Num(b)),
            }
        }
        if b == 1 {
            return Expr::Num(a);
        }
        return match a.checked_neg() {
            Some(positive) if a < 0 => Expr::neg(Expr::div(Expr::Num(positive), Expr::Num(b))),
            _ => Expr::div(Expr::Num(a), Expr::Num(b)),
        };
    }

    Expr::div(numerator, denominator)
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    // gcd of i64 values fits unless both are i64::MIN.
    i64::try_from(a).unwrap_or(1).max(1)
}
