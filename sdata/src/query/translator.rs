//! Query chain → SData URL translation.
//!
//! Grammar produced:
//!
//! ```text
//! <base>/-/<resourcePath>[?where=<expr>[&select=<fields>]][&include=<fields>]
//! ```
//!
//! Translation is a pure function of the chain and the resolved resource
//! path, so translating the same chain twice yields the same text.

use crate::catalog::ResourceResolver;
use crate::error::{SDataError, SDataResult};
use crate::query::ast::{BinaryOp, Expr, QueryNode};
use crate::query::projector::project_properties;
use crate::value::Value;
use chrono::SecondsFormat;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub query_text: String,
    /// Selector to apply client-side to each materialized entity.
    pub projector: Option<Expr>,
}

pub struct Translator {
    base_url: String,
    resolver: Arc<ResourceResolver>,
}

/// Query clauses collected from a chain, innermost first.
#[derive(Default)]
struct Clauses {
    items: Vec<String>,
    projector: Option<Expr>,
}

impl Translator {
    pub fn new(base_url: impl Into<String>, resolver: Arc<ResourceResolver>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, resolver }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolver(&self) -> &Arc<ResourceResolver> {
        &self.resolver
    }

    pub fn resource_url(&self, kind: &str) -> SDataResult<String> {
        Ok(format!(
            "{}/-/{}",
            self.base_url,
            self.resolver.resource_path(kind)?
        ))
    }

    /// Address of a single resource: `<resource url>('<id>')`.
    pub fn id_to_query_text(&self, kind: &str, id: &str) -> SDataResult<String> {
        Ok(format!("{}('{}')", self.resource_url(kind)?, id))
    }

    /// Translates a query chain into its URL and, for projections, the selector
    /// to apply client side.
    ///
    /// Clauses are `where=` (innermost filter first), then `select=`, then
    /// `include=`. The first clause is introduced with `?` and the rest with
    /// `&`, so a chain whose only clause is an include yields
    /// `<resource>?include=...` rather than `<resource>&include=...`.
    pub fn translate(&self, node: &QueryNode) -> SDataResult<TranslationResult> {
        let mut query_text = self.resource_url(node.kind())?;
        let mut clauses = collect_clauses(node)?;

        let includes = node.include_names();
        if !includes.is_empty() {
            clauses.items.push(format!("include={}", includes.join(",")));
        }

        for (position, clause) in clauses.items.iter().enumerate() {
            query_text.push(if position == 0 { '?' } else { '&' });
            query_text.push_str(clause);
        }

        Ok(TranslationResult {
            query_text,
            projector: clauses.projector,
        })
    }
}

fn collect_clauses(node: &QueryNode) -> SDataResult<Clauses> {
    match node {
        QueryNode::Source { .. } => Ok(Clauses::default()),
        QueryNode::Include { input, .. } => collect_clauses(input),
        QueryNode::Filter { input, predicate } => {
            let mut clauses = collect_clauses(input)?;
            if clauses.projector.is_some() {
                return Err(SDataError::shape("filter applied after a projection"));
            }
            clauses
                .items
                .push(format!("where={}", translate_predicate(predicate)?));
            Ok(clauses)
        }
        QueryNode::Project { input, selector } => {
            let mut clauses = collect_clauses(input)?;
            if clauses.projector.is_some() {
                return Err(SDataError::shape("projection applied after a projection"));
            }
            let projection = project_properties(selector);
            clauses
                .items
                .push(format!("select={}", projection.properties));
            clauses.projector = Some(projection.selector);
            Ok(clauses)
        }
    }
}

/// Renders a predicate as fully parenthesized infix.
pub fn translate_predicate(expr: &Expr) -> SDataResult<String> {
    match expr {
        Expr::Binary { op, left, right } => {
            let keyword = operator_keyword(*op)?;
            Ok(format!(
                "({} {} {})",
                translate_predicate(left)?,
                keyword,
                translate_predicate(right)?
            ))
        }
        Expr::Member { name, .. } => expr
            .direct_member_name()
            .map(str::to_string)
            .ok_or_else(|| SDataError::UnsupportedMember(name.clone())),
        Expr::Constant(value) => format_constant(value),
        Expr::Capture { name, .. } => Err(SDataError::UnsupportedMember(name.clone())),
        Expr::Call { name, .. } => Err(SDataError::UnsupportedOperator(name.clone())),
        Expr::Param => Err(SDataError::shape("bare bound variable in predicate")),
        Expr::Construct(_) => Err(SDataError::shape("record construction in predicate")),
    }
}

fn operator_keyword(op: BinaryOp) -> SDataResult<&'static str> {
    match op {
        BinaryOp::And | BinaryOp::AndAlso => Ok("and"),
        BinaryOp::Or => Ok("or"),
        BinaryOp::Eq => Ok("eq"),
        BinaryOp::Ne => Ok("ne"),
        BinaryOp::Lt => Ok("lt"),
        BinaryOp::Le => Ok("le"),
        BinaryOp::Gt => Ok("gt"),
        BinaryOp::Ge => Ok("ge"),
        other => Err(SDataError::UnsupportedOperator(other.name().to_string())),
    }
}

/// Literal spelling of a constant. Text is quoted but not escaped.
pub fn format_constant(value: &Value) -> SDataResult<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Text(s) => Ok(format!("'{}'", s)),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::DateTime(dt) => Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Record(_) => Err(SDataError::UnsupportedConstant(value.to_string())),
    }
}
