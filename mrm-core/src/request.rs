//! Request decoding.
//!
//! Turns the single host argument into a validated [`Problem`] (generate entry
//! points) or the raw source text (parse entry point). A request that fails
//! any check here never reaches the engine.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::FormattingConfig;
use crate::host::{single_string_argument, ArgumentMessages, HostValue};

/// A validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    /// Expression template, e.g. `a+b`
    pub expression: String,
    /// Variable domains in iteration order
    pub domains: Vec<VariableDomain>,
    /// Constraint relations, e.g. `a \neq b`
    pub constraints: Vec<String>,
    /// Rendering options for the generated questions
    pub context: FormattingConfig,
}

/// The values one template variable ranges over.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDomain {
    pub variable: String,
    pub values: DomainValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainValues {
    /// Inclusive integer range
    Range { low: i64, high: i64 },
    /// Explicit list of values
    Discrete(Vec<DomainValue>),
}

impl DomainValues {
    /// Number of values in the domain.
    pub fn len(&self) -> u64 {
        match self {
            Self::Range { low, high } if low <= high => {
                (*high as i128 - *low as i128 + 1).min(u64::MAX as i128) as u64
            }
            Self::Range { .. } => 0,
            Self::Discrete(values) => values.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single discrete domain value: an integer or an expression source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainValue {
    Integer(i64),
    Expression(String),
}

// ============================================================================
// Wire format
// ============================================================================

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProblemPayload {
    expression: String,
    #[serde(default)]
    domains: DomainsPayload,
    #[serde(default)]
    constraints: ConstraintsPayload,
    #[serde(alias = "options")]
    context: FormattingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DomainsPayload {
    ByName(BTreeMap<String, DomainPayload>),
    Listed(Vec<NamedDomainPayload>),
}

impl Default for DomainsPayload {
    fn default() -> Self {
        Self::ByName(BTreeMap::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DomainPayload {
    Values(Vec<DomainValue>),
    Spec(DomainSpecPayload),
}

#[derive(Debug, Deserialize)]
struct DomainSpecPayload {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    low: Option<i64>,
    #[serde(default)]
    high: Option<i64>,
    #[serde(default)]
    values: Option<Vec<DomainValue>>,
}

#[derive(Debug, Deserialize)]
struct NamedDomainPayload {
    variable: String,
    #[serde(flatten)]
    spec: DomainSpecPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConstraintsPayload {
    ByName(BTreeMap<String, ConstraintPayload>),
    Listed(Vec<ConstraintPayload>),
}

impl Default for ConstraintsPayload {
    fn default() -> Self {
        Self::ByName(BTreeMap::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConstraintPayload {
    Expression(String),
    Detailed {
        expression: String,
        #[serde(default = "default_active")]
        active: bool,
    },
}

impl DomainSpecPayload {
    fn into_values(self, variable: &str) -> Result<Option<DomainValues>> {
        if !self.active {
            return Ok(None);
        }
        let values = match (self.kind.as_deref(), self.values, self.low, self.high) {
            (Some("discrete") | None, Some(values), _, _) => DomainValues::Discrete(values),
            (Some("integer") | None, None, Some(low), Some(high)) => {
                DomainValues::Range { low, high }
            }
            (Some(kind @ ("discrete" | "integer")), _, _, _) => {
                return Err(Error::decode(format!(
                    "{} domain for '{}' is missing its bounds or values",
                    kind, variable
                )))
            }
            (Some(other), _, _, _) => {
                return Err(Error::decode(format!(
                    "unknown domain type '{}' for '{}'",
                    other, variable
                )))
            }
            (None, None, _, _) => {
                return Err(Error::decode(format!(
                    "domain for '{}' must define values or low/high",
                    variable
                )))
            }
        };
        Ok(Some(values))
    }
}

impl TryFrom<ProblemPayload> for Problem {
    type Error = Error;

    fn try_from(payload: ProblemPayload) -> Result<Self> {
        if payload.expression.trim().is_empty() {
            return Err(Error::decode("expression must not be empty"));
        }

        let named: Vec<(String, Option<DomainValues>)> = match payload.domains {
            DomainsPayload::ByName(map) => map
                .into_iter()
                .map(|(variable, domain)| {
                    let values = match domain {
                        DomainPayload::Values(values) => Some(DomainValues::Discrete(values)),
                        DomainPayload::Spec(spec) => spec.into_values(&variable)?,
                    };
                    Ok((variable, values))
                })
                .collect::<Result<_>>()?,
            DomainsPayload::Listed(list) => list
                .into_iter()
                .map(|named| {
                    let values = named.spec.into_values(&named.variable)?;
                    Ok((named.variable, values))
                })
                .collect::<Result<_>>()?,
        };

        let mut seen = HashSet::new();
        let mut domains = Vec::with_capacity(named.len());
        for (variable, values) in named {
            let variable = variable.trim().to_string();
            if variable.is_empty() {
                return Err(Error::decode("domain variable name must not be empty"));
            }
            if !seen.insert(variable.clone()) {
                return Err(Error::decode(format!(
                    "duplicate domain for variable '{}'",
                    variable
                )));
            }
            let Some(values) = values else {
                continue;
            };
            if values.is_empty() {
                return Err(Error::decode(format!("domain for '{}' is empty", variable)));
            }
            domains.push(VariableDomain { variable, values });
        }

        let listed: Vec<ConstraintPayload> = match payload.constraints {
            ConstraintsPayload::ByName(map) => map.into_values().collect(),
            ConstraintsPayload::Listed(list) => list,
        };
        let mut constraints = Vec::with_capacity(listed.len());
        for constraint in listed {
            let expression = match constraint {
                ConstraintPayload::Expression(expression) => expression,
                ConstraintPayload::Detailed { active: false, .. } => continue,
                ConstraintPayload::Detailed { expression, .. } => expression,
            };
            if expression.trim().is_empty() {
                return Err(Error::decode("constraint must not be empty"));
            }
            constraints.push(expression);
        }

        Ok(Problem {
            expression: payload.expression,
            domains,
            constraints,
            context: payload.context,
        })
    }
}

/// Decode a problem from its JSON text.
pub fn decode_problem_json(json: &str) -> Result<Problem> {
    let payload: ProblemPayload =
        serde_json::from_str(json).map_err(|e| Error::decode(e.to_string()))?;
    Problem::try_from(payload)
}

/// Validate the host arguments of a generate entry point and decode the problem.
pub fn decode_problem(args: &[HostValue]) -> Result<Problem> {
    let json = single_string_argument(args, &ArgumentMessages::GENERATE)?;
    decode_problem_json(json)
}

/// Validate the host arguments of the parse entry point and return the source.
pub fn decode_source(args: &[HostValue]) -> Result<&str> {
    single_string_argument(args, &ArgumentMessages::PARSE)
}
