//! Query language and engine.
//!
//! A filter string such as `status=open assignee:"Jane Doe" OR title~crash`
//! is parsed into a [`Query`], executed through the [`CaseClient`] and
//! materialized into cached cases.
//!
//! # Submodules
//!
//! - [`parser`] - Tokenizer and recursive-descent parser
//! - [`engine`] - Saved searches, shortcuts, paging and result caching
//!
//! [`CaseClient`]: crate::client::CaseClient

pub mod engine;
pub mod parser;

pub use engine::{QueryContext, QueryEngine, QuerySettings, SHORTCUTS};
pub use parser::parse;

use crate::model::CaseSnapshot;
use std::cmp::Ordering;
use std::fmt;

/// Fields usable in predicates and sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryField {
    Id,
    Title,
    Status,
    Assignee,
    Project,
    Area,
    OpenedBy,
    Tag,
    Parent,
}

impl QueryField {
    pub const ALL: [Self; 9] = [
        Self::Id,
        Self::Title,
        Self::Status,
        Self::Assignee,
        Self::Project,
        Self::Area,
        Self::OpenedBy,
        Self::Tag,
        Self::Parent,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Status => "status",
            Self::Assignee => "assignee",
            Self::Project => "project",
            Self::Area => "area",
            Self::OpenedBy => "openedby",
            Self::Tag => "tag",
            Self::Parent => "parent",
        }
    }

    /// Look up a field by name or alias, case-insensitively.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let canonical = match lower.as_str() {
            "assignedto" | "assigned" | "owner" => "assignee",
            "opened" | "opener" => "openedby",
            "tags" => "tag",
            "case" | "ixbug" => "id",
            other => other,
        };
        Self::ALL.into_iter().find(|f| f.as_str() == canonical)
    }

    /// Compare two snapshots on this field. Missing values sort first.
    #[must_use]
    pub fn compare(&self, a: &CaseSnapshot, b: &CaseSnapshot) -> Ordering {
        match self {
            Self::Id => a.id.cmp(&b.id),
            Self::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            Self::Status => a.status.cmp(&b.status),
            Self::Assignee => a.assignee.cmp(&b.assignee),
            Self::Project => a.project.cmp(&b.project),
            Self::Area => a.area.cmp(&b.area),
            Self::OpenedBy => a.opened_by.cmp(&b.opened_by),
            Self::Tag => a.tags.first().cmp(&b.tags.first()),
            Self::Parent => a.parent.cmp(&b.parent),
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equals,
    Contains,
}

impl MatchOp {
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::Contains => "~",
        }
    }
}

/// `field op value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: QueryField,
    pub op: MatchOp,
    pub value: String,
}

/// Boolean filter expression.
///
/// `And`/`Or` never directly contain a node of their own kind and always
/// hold at least two operands; the parser flattens them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Match(Predicate),
    /// Full-text word or phrase.
    Text(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Build a conjunction, flattening nested conjunctions.
    #[must_use]
    pub fn and(operands: Vec<Expr>) -> Expr {
        Self::join(operands, true)
    }

    /// Build a disjunction, flattening nested disjunctions.
    #[must_use]
    pub fn or(operands: Vec<Expr>) -> Expr {
        Self::join(operands, false)
    }

    fn join(operands: Vec<Expr>, conjunction: bool) -> Expr {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Expr::And(inner) if conjunction => flat.extend(inner),
                Expr::Or(inner) if !conjunction => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        if conjunction {
            Expr::And(flat)
        } else {
            Expr::Or(flat)
        }
    }

    /// Visit every predicate.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Expr::Match(p) => out.push(p),
            Expr::Text(_) => {}
            Expr::Not(inner) => inner.collect_predicates(out),
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_predicates(out);
                }
            }
        }
    }

    /// Replace every predicate value equal to `from` with `to`.
    pub fn substitute(&mut self, from: &str, to: &str) {
        match self {
            Expr::Match(p) => {
                if p.value.eq_ignore_ascii_case(from) {
                    p.value = to.to_string();
                }
            }
            Expr::Text(_) => {}
            Expr::Not(inner) => inner.substitute(from, to),
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.substitute(from, to);
                }
            }
        }
    }
}

/// Quote a value so the tokenizer reads it back verbatim.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Match(p) => write!(f, "{}{}{}", p.field, p.op.symbol(), quote(&p.value)),
            Expr::Text(text) => f.write_str(&quote(text)),
            Expr::Not(inner) => match inner.as_ref() {
                Expr::And(_) | Expr::Or(_) => write!(f, "NOT ({inner})"),
                other => write!(f, "NOT {other}"),
            },
            Expr::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    if matches!(item, Expr::Or(_)) {
                        write!(f, "({item})")?;
                    } else {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Expr::Or(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

/// Explicit ordering requested with `sort:field` or `sort:-field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: QueryField,
    pub descending: bool,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.descending { "-" } else { "" };
        write!(f, "sort:{sign}{}", self.field)
    }
}

/// A parsed filter plus optional sort key.
///
/// `Display` produces the canonical form, which parses back to an equal
/// `Query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub filter: Expr,
    pub sort: Option<SortKey>,
}

impl Query {
    /// Stable-sort snapshots by the query's sort key, if any.
    pub fn apply_sort(&self, cases: &mut [CaseSnapshot]) {
        if let Some(key) = self.sort {
            cases.sort_by(|a, b| {
                let ord = key.field.compare(a, b);
                if key.descending { ord.reverse() } else { ord }
            });
        }
    }

    /// Whether any predicate constrains `field`.
    #[must_use]
    pub fn constrains(&self, field: QueryField) -> bool {
        self.filter.predicates().iter().any(|p| p.field == field)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filter)?;
        if let Some(sort) = self.sort {
            write!(f, " {sort}")?;
        }
        Ok(())
    }
}
