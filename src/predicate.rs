//! Composable filters over object attributes.
//!
//! The access layer never looks inside a predicate; it hands it to the
//! engine, which validates the attribute names against the entity and
//! evaluates it per object.

use crate::types::{Attributes, Value, NULL_VALUE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// A boolean predicate over an object's attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches everything.
    True,
    Compare {
        attribute: String,
        op: Comparison,
        value: Value,
    },
    In {
        attribute: String,
        values: Vec<Value>,
    },
    IsNull(String),
    Contains {
        attribute: String,
        needle: String,
        case_insensitive: bool,
    },
    BeginsWith {
        attribute: String,
        prefix: String,
        case_insensitive: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(attribute: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Eq, value)
    }

    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Ne, value)
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Lt, value)
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Le, value)
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Gt, value)
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Ge, value)
    }

    pub fn one_of(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            attribute: attribute.into(),
            values,
        }
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Predicate::IsNull(attribute.into())
    }

    pub fn contains(attribute: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            attribute: attribute.into(),
            needle: needle.into(),
            case_insensitive: false,
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
            case_insensitive: false,
        }
    }

    /// Make a string match ignore case. Other predicates are returned as-is.
    pub fn ignoring_case(self) -> Self {
        match self {
            Predicate::Contains {
                attribute, needle, ..
            } => Predicate::Contains {
                attribute,
                needle,
                case_insensitive: true,
            },
            Predicate::BeginsWith {
                attribute, prefix, ..
            } => Predicate::BeginsWith {
                attribute,
                prefix,
                case_insensitive: true,
            },
            other => other,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against one object's attributes. Missing attributes are null.
    pub fn evaluate(&self, attributes: &Attributes) -> bool {
        fn lookup<'a>(attributes: &'a Attributes, name: &str) -> &'a Value {
            attributes.get(name).unwrap_or(&NULL_VALUE)
        }

        match self {
            Predicate::True => true,
            Predicate::Compare {
                attribute,
                op,
                value,
            } => {
                let actual = lookup(attributes, attribute);
                // Ordering comparisons never match across null.
                if (actual.is_null() || value.is_null())
                    && !matches!(op, Comparison::Eq | Comparison::Ne)
                {
                    return false;
                }
                op.holds(actual.total_cmp(value))
            }
            Predicate::In { attribute, values } => {
                let actual = lookup(attributes, attribute);
                values.iter().any(|v| v.loosely_eq(actual))
            }
            Predicate::IsNull(attribute) => lookup(attributes, attribute).is_null(),
            Predicate::Contains {
                attribute,
                needle,
                case_insensitive,
            } => match lookup(attributes, attribute).as_str() {
                Some(text) if *case_insensitive => {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
                Some(text) => text.contains(needle.as_str()),
                None => false,
            },
            Predicate::BeginsWith {
                attribute,
                prefix,
                case_insensitive,
            } => match lookup(attributes, attribute).as_str() {
                Some(text) if *case_insensitive => {
                    text.to_lowercase().starts_with(&prefix.to_lowercase())
                }
                Some(text) => text.starts_with(prefix.as_str()),
                None => false,
            },
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(attributes)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(attributes)),
            Predicate::Not(inner) => !inner.evaluate(attributes),
        }
    }

    /// Every attribute name the predicate refers to.
    pub fn attributes(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names);
        names
    }

    fn collect_attributes<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Predicate::True => {}
            Predicate::Compare { attribute, .. }
            | Predicate::In { attribute, .. }
            | Predicate::IsNull(attribute)
            | Predicate::Contains { attribute, .. }
            | Predicate::BeginsWith { attribute, .. } => names.push(attribute),
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_attributes(names);
                }
            }
            Predicate::Not(inner) => inner.collect_attributes(names),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", part)?;
            }
            write!(f, ")")
        }

        match self {
            Predicate::True => write!(f, "TRUEPREDICATE"),
            Predicate::Compare {
                attribute,
                op,
                value,
            } => write!(f, "{} {} {:?}", attribute, op.symbol(), value),
            Predicate::In { attribute, values } => write!(f, "{} IN {:?}", attribute, values),
            Predicate::IsNull(attribute) => write!(f, "{} == nil", attribute),
            Predicate::Contains {
                attribute,
                needle,
                case_insensitive,
            } => write!(
                f,
                "{} CONTAINS{} {:?}",
                attribute,
                if *case_insensitive { "[c]" } else { "" },
                needle
            ),
            Predicate::BeginsWith {
                attribute,
                prefix,
                case_insensitive,
            } => write!(
                f,
                "{} BEGINSWITH{} {:?}",
                attribute,
                if *case_insensitive { "[c]" } else { "" },
                prefix
            ),
            Predicate::And(parts) => join(f, parts, "AND"),
            Predicate::Or(parts) => join(f, parts, "OR"),
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}
