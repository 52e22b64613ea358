//! Typed table restrictions and their rendering.
//!
//! The desktop client accepts two filter dialects. The bracketed one reads
//! `[FlagStatus] = 2`; the schema-name one is prefixed with `@SQL=` and
//! quotes full property names. Some properties are only filtered reliably
//! through the schema dialect, and `IS NULL` only exists there, so the
//! dialect is chosen from the expression rather than by the caller.
//!
//! Date literals are always written as `'dd/mm/yyyy HH:MM'` so that the
//! client's locale never changes their meaning.

use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{DueBucket, FlagStatus};

const TASK_NAMESPACE: &str = "http://schemas.microsoft.com/mapi/id/{00062003-0000-0000-C000-000000000046}";

/// Filterable item property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Unread flag.
    Unread,
    /// Follow-up flag state.
    FlagStatus,
    /// Follow-up due date on mail.
    TaskDueDate,
    /// Due date on task items.
    DueDate,
    /// Received time.
    ReceivedTime,
    /// Task completion.
    Complete,
    /// Appointment start.
    Start,
    /// Appointment end.
    End,
}

impl Property {
    /// Bracketed-dialect name.
    #[must_use]
    pub const fn jet_name(self) -> &'static str {
        match self {
            Self::Unread => "UnRead",
            Self::FlagStatus => "FlagStatus",
            Self::TaskDueDate => "TaskDueDate",
            Self::DueDate => "DueDate",
            Self::ReceivedTime => "ReceivedTime",
            Self::Complete => "Complete",
            Self::Start => "Start",
            Self::End => "End",
        }
    }

    /// Schema name. The unread flag only exists as its inverse, "read".
    #[must_use]
    pub fn dasl_name(self) -> String {
        match self {
            Self::Unread => "urn:schemas:httpmail:read".to_string(),
            Self::FlagStatus => "http://schemas.microsoft.com/mapi/proptag/0x10900003".to_string(),
            Self::TaskDueDate | Self::DueDate => format!("{TASK_NAMESPACE}/81050040"),
            Self::ReceivedTime => "urn:schemas:httpmail:datereceived".to_string(),
            Self::Complete => format!("{TASK_NAMESPACE}/811C000B"),
            Self::Start => "urn:schemas:calendar:dtstart".to_string(),
            Self::End => "urn:schemas:calendar:dtend".to_string(),
        }
    }

    /// Whether the bracketed dialect filters this property reliably.
    #[must_use]
    pub const fn jet_reliable(self) -> bool {
        !matches!(self, Self::Unread | Self::ReceivedTime)
    }
}

/// Literal operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
    /// Boolean.
    Bool(bool),
    /// Integer or enum constant.
    Int(i64),
    /// Local wall-clock date.
    Date(NaiveDateTime),
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<NaiveDateTime> for Literal {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Op {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Filter dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `[Property] = value`
    Jet,
    /// `@SQL="schema-name" = value`
    Dasl,
}

/// Restriction expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    /// `property op value`
    Compare {
        /// Left-hand property.
        property: Property,
        /// Operator.
        op: Op,
        /// Right-hand literal.
        value: Literal,
    },
    /// Property has no value.
    IsNull(Property),
    /// Conjunction.
    And(Vec<Restriction>),
    /// Disjunction.
    Or(Vec<Restriction>),
    /// Negation.
    Not(Box<Restriction>),
}

/// Formats a date literal in the locale-independent form.
#[must_use]
pub fn date_literal(value: NaiveDateTime) -> String {
    format!("'{}'", value.format("%d/%m/%Y %H:%M"))
}

impl Restriction {
    /// `property op value`.
    pub fn compare(property: Property, op: Op, value: impl Into<Literal>) -> Self {
        Self::Compare {
            property,
            op,
            value: value.into(),
        }
    }

    /// `property = value`.
    pub fn eq(property: Property, value: impl Into<Literal>) -> Self {
        Self::compare(property, Op::Eq, value)
    }

    /// Flagged for follow-up (not completed).
    #[must_use]
    pub fn flagged() -> Self {
        Self::eq(Property::FlagStatus, FlagStatus::Marked.to_local())
    }

    /// Conjunction of `parts`, collapsing trivial cases.
    #[must_use]
    pub fn all(mut parts: Vec<Self>) -> Option<Self> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::And(parts)),
        }
    }

    /// OR-group matching any of `buckets` on `property`.
    ///
    /// Returns `None` when `buckets` is empty, meaning "no due restriction".
    #[must_use]
    pub fn due_in(property: Property, buckets: &[DueBucket], today: NaiveDate) -> Option<Self> {
        let mut group = Vec::new();
        for bucket in DueBucket::ALL.iter().filter(|b| buckets.contains(b)) {
            let clause = match bucket.window(today) {
                None => Self::IsNull(property),
                Some((from, until)) => {
                    let mut bounds = Vec::new();
                    if let Some(from) = from {
                        bounds.push(Self::compare(property, Op::Ge, from));
                    }
                    if let Some(until) = until {
                        bounds.push(Self::compare(property, Op::Lt, until));
                    }
                    match Self::all(bounds) {
                        Some(clause) => clause,
                        None => continue,
                    }
                }
            };
            group.push(clause);
        }
        match group.len() {
            0 => None,
            1 => group.pop(),
            _ => Some(Self::Or(group)),
        }
    }

    /// The dialect this expression must be rendered in.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        if self.needs_dasl() {
            Dialect::Dasl
        } else {
            Dialect::Jet
        }
    }

    fn needs_dasl(&self) -> bool {
        match self {
            Self::Compare { property, .. } => !property.jet_reliable(),
            Self::IsNull(_) => true,
            Self::And(parts) | Self::Or(parts) => parts.iter().any(Self::needs_dasl),
            Self::Not(inner) => inner.needs_dasl(),
        }
    }

    /// Renders the filter string handed to the client.
    #[must_use]
    pub fn render(&self) -> String {
        let dialect = self.dialect();
        let mut out = String::new();
        if dialect == Dialect::Dasl {
            out.push_str("@SQL=");
        }
        self.render_in(dialect, &mut out);
        out
    }

    fn render_in(&self, dialect: Dialect, out: &mut String) {
        match self {
            Self::Compare {
                property,
                op,
                value,
            } => render_compare(*property, *op, *value, dialect, out),
            Self::IsNull(property) => {
                // Only reachable in the schema dialect.
                let _ = write!(out, "\"{}\" IS NULL", property.dasl_name());
            }
            Self::And(parts) => render_group(parts, " AND ", dialect, out),
            Self::Or(parts) => render_group(parts, " OR ", dialect, out),
            Self::Not(inner) => {
                out.push_str("NOT (");
                inner.render_in(dialect, out);
                out.push(')');
            }
        }
    }
}

fn render_group(parts: &[Restriction], joiner: &str, dialect: Dialect, out: &mut String) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(joiner);
        }
        let nested = matches!(part, Restriction::And(_) | Restriction::Or(_));
        if nested {
            out.push('(');
        }
        part.render_in(dialect, out);
        if nested {
            out.push(')');
        }
    }
}

fn render_compare(property: Property, op: Op, value: Literal, dialect: Dialect, out: &mut String) {
    match dialect {
        Dialect::Jet => {
            let literal = match value {
                Literal::Bool(true) => "True".to_string(),
                Literal::Bool(false) => "False".to_string(),
                Literal::Int(i) => i.to_string(),
                Literal::Date(d) => date_literal(d),
            };
            let _ = write!(out, "[{}] {} {literal}", property.jet_name(), op.symbol());
        }
        Dialect::Dasl => {
            let value = match (property, value) {
                (Property::Unread, Literal::Bool(b)) => Literal::Bool(!b),
                (Property::Unread, Literal::Int(i)) => Literal::Int(i64::from(i == 0)),
                _ => value,
            };
            let literal = match value {
                Literal::Bool(b) => i64::from(b).to_string(),
                Literal::Int(i) => i.to_string(),
                Literal::Date(d) => date_literal(d),
            };
            let _ = write!(out, "\"{}\" {} {literal}", property.dasl_name(), op.symbol());
        }
    }
}
