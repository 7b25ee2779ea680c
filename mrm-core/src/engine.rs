//! Expression engine seam.
//!
//! The bridge talks to the expression algebra only through [`Engine`] and the
//! [`Producer`] it hands out. [`CalcEngine`] is the built-in implementation:
//! it walks the cartesian product of the variable domains, keeps assignments
//! that satisfy every constraint and substitutes them into the template.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::algebra::{parse_expression, parse_relation, Expr, Relation};
use crate::config::GenerationLimits;
use crate::error::{Error, Result};
use crate::request::{DomainValue, DomainValues, Problem, VariableDomain};

/// Ordered expressions produced by one production step.
pub type ResultBatch = Vec<Expr>;

/// Result of reading expression source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub expression: Expr,
    /// Free symbol names, sorted
    pub symbols: BTreeSet<String>,
}

/// A lazily evaluated stream of result batches.
///
/// `Ok(None)` and an empty batch both mean the producer is exhausted.
pub trait Producer: Send {
    /// Produce the next batch.
    fn next_batch(&mut self) -> Result<Option<ResultBatch>>;

    /// Produce the next non-empty batch, or `None` once exhausted.
    fn step(&mut self) -> Result<Option<ResultBatch>> {
        Ok(self.next_batch()?.filter(|batch| !batch.is_empty()))
    }

    /// Consume the whole producer.
    fn drain(&mut self) -> Result<Vec<Expr>> {
        let mut all = Vec::new();
        while let Some(batch) = self.step()? {
            all.extend(batch);
        }
        Ok(all)
    }
}

/// The expression engine consumed by the bridge.
pub trait Engine: Send + Sync {
    /// Start generating questions for a problem.
    fn generate(&self, problem: &Problem) -> Result<Box<dyn Producer>>;

    /// Read expression source text.
    fn read(&self, source: &str) -> Result<ParseResult>;

    /// Normalise an expression.
    fn simplify(&self, expr: &Expr) -> Expr {
        expr.simplify()
    }
}

// ============================================================================
// Engine adapter
// ============================================================================

/// Thin wrapper that logs engine calls.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn Engine>,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Invoke the engine's generation function.
    pub fn start(&self, problem: &Problem) -> Result<Box<dyn Producer>> {
        debug!(
            expression = %problem.expression,
            domains = problem.domains.len(),
            constraints = problem.constraints.len(),
            "Starting generation"
        );
        self.engine.generate(problem).inspect_err(|e| {
            warn!(error = %e, kind = e.kind(), "Engine rejected problem");
        })
    }

    /// Read and normalise expression source.
    pub fn read(&self, source: &str) -> Result<ParseResult> {
        let parsed = self.engine.read(source).inspect_err(|e| {
            debug!(error = %e, "Failed to read expression");
        })?;
        Ok(ParseResult {
            expression: self.engine.simplify(&parsed.expression),
            symbols: parsed.symbols,
        })
    }

    /// Defer [`EngineAdapter::start`] to the first step of the returned producer.
    ///
    /// The engine's start-up work then runs on the thread that drives the
    /// producer, and a start failure is reported by that first step.
    pub fn start_deferred(&self, problem: Problem) -> Box<dyn Producer> {
        Box::new(DeferredProducer {
            adapter: self.clone(),
            problem: Some(problem),
            started: None,
        })
    }
}

struct DeferredProducer {
    adapter: EngineAdapter,
    problem: Option<Problem>,
    started: Option<Box<dyn Producer>>,
}

impl Producer for DeferredProducer {
    fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        if let Some(problem) = self.problem.take() {
            self.started = Some(self.adapter.start(&problem)?);
        }
        match self.started.as_mut() {
            Some(producer) => producer.next_batch(),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Built-in engine
// ============================================================================

/// Built-in template generator over integer and expression domains.
#[derive(Debug, Clone, Default)]
pub struct CalcEngine {
    limits: GenerationLimits,
}

impl CalcEngine {
    pub fn new(limits: GenerationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }
}

impl Engine for CalcEngine {
    fn generate(&self, problem: &Problem) -> Result<Box<dyn Producer>> {
        let template = parse_expression(&problem.expression)
            .map_err(|e| Error::engine(format!("invalid expression template: {}", e)))?;

        let axes = problem
            .domains
            .iter()
            .map(Axis::new)
            .collect::<Result<Vec<_>>>()?;

        let combinations = axes
            .iter()
            .try_fold(1u64, |total, axis| total.checked_mul(axis.len()))
            .filter(|total| *total <= self.limits.max_combinations)
            .ok_or_else(|| {
                Error::engine(format!(
                    "domain space exceeds the limit of {} combinations",
                    self.limits.max_combinations
                ))
            })?;

        let known: HashSet<&str> = axes.iter().map(|axis| axis.variable.as_str()).collect();
        let mut constraints = Vec::with_capacity(problem.constraints.len());
        for source in &problem.constraints {
            let relation = parse_relation(source)
                .map_err(|e| Error::engine(format!("invalid constraint '{}': {}", source, e)))?;
            if let Some(unknown) = relation.symbols().into_iter().find(|s| !known.contains(s.as_str())) {
                return Err(Error::engine(format!(
                    "constraint '{}' references variable '{}' without a domain",
                    source, unknown
                )));
            }
            constraints.push(relation);
        }

        let mut producer = CalcProducer {
            template,
            cursor: Some(vec![0; axes.len()]),
            axes,
            constraints,
            pending: None,
            batch_size: self.limits.batch_size.max(1),
        };

        producer.pending = producer.seek();
        if producer.pending.is_none() {
            return Err(Error::engine(
                "constraints cannot be satisfied by any assignment",
            ));
        }

        debug!(combinations, "Generation started");
        Ok(Box::new(producer))
    }

    fn read(&self, source: &str) -> Result<ParseResult> {
        let expression = parse_expression(source).map_err(|e| Error::parse(e.to_string()))?;
        let symbols = expression.symbols();
        Ok(ParseResult {
            expression,
            symbols,
        })
    }
}

/// One variable of the domain space.
#[derive(Debug)]
struct Axis {
    variable: String,
    values: AxisValues,
}

#[derive(Debug)]
enum AxisValues {
    Range { low: i64, len: u64 },
    Listed(Vec<Expr>),
}

impl Axis {
    fn new(domain: &VariableDomain) -> Result<Self> {
        let values = match &domain.values {
            DomainValues::Range { low, .. } => AxisValues::Range {
                low: *low,
                len: domain.values.len(),
            },
            DomainValues::Discrete(values) => AxisValues::Listed(
                values
                    .iter()
                    .map(|value| match value {
                        DomainValue::Integer(n) => Ok(Expr::num(*n)),
                        DomainValue::Expression(src) => parse_expression(src).map_err(|e| {
                            Error::engine(format!(
                                "invalid value '{}' for '{}': {}",
                                src, domain.variable, e
                            ))
                        }),
                    })
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(Self {
            variable: domain.variable.clone(),
            values,
        })
    }

    fn len(&self) -> u64 {
        match &self.values {
            AxisValues::Range { len, .. } => *len,
            AxisValues::Listed(values) => values.len() as u64,
        }
    }

    fn value(&self, index: u64) -> Expr {
        match &self.values {
            // index < len, so low + index never passes the upper bound
            AxisValues::Range { low, .. } => Expr::num((*low as i128 + index as i128) as i64),
            AxisValues::Listed(values) => values[index as usize].clone(),
        }
    }
}

struct CalcProducer {
    template: Expr,
    axes: Vec<Axis>,
    constraints: Vec<Relation>,
    /// Next assignment to examine; `None` once the space is exhausted
    cursor: Option<Vec<u64>>,
    /// Satisfying expression found ahead of the next batch
    pending: Option<Expr>,
    batch_size: usize,
}

impl CalcProducer {
    /// Advance to the next satisfying assignment and return its substitution.
    fn seek(&mut self) -> Option<Expr> {
        while let Some(position) = self.cursor.take() {
            let bindings: HashMap<String, Expr> = self
                .axes
                .iter()
                .zip(&position)
                .map(|(axis, index)| (axis.variable.clone(), axis.value(*index)))
                .collect();
            self.cursor = self.advance(position);

            if self.constraints.iter().all(|c| c.holds(&bindings)) {
                return Some(self.template.substitute(&bindings));
            }
        }
        None
    }

    /// Odometer step with the last axis varying fastest.
    fn advance(&self, mut position: Vec<u64>) -> Option<Vec<u64>> {
        for i in (0..position.len()).rev() {
            position[i] += 1;
            if position[i] < self.axes[i].len() {
                return Some(position);
            }
            position[i] = 0;
        }
        None
    }
}

impl Producer for CalcProducer {
    fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        if let Some(first) = self.pending.take() {
            batch.push(first);
        }
        while batch.len() < self.batch_size {
            match self.seek() {
                Some(expr) => batch.push(expr),
                None => break,
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}
