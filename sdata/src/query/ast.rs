//! Query AST and the typed builder over it.
//!
//! A query is a linear chain of [`QueryNode`]s rooted at a `Source`. Filter
//! predicates and projection selectors are [`Expr`] trees over a single bound
//! variable, [`Expr::Param`], which stands for the element being queried.
//!
//! ```
//! use sdata::query::{lit, member, Query};
//! # use sdata::entity::{Entity, Field};
//! # use std::sync::OnceLock;
//! # #[derive(Default)]
//! # struct Contact { first_name: String }
//! # impl Entity for Contact {
//! #     const KIND: &'static str = "Contact";
//! #     fn fields() -> &'static [Field<Self>] {
//! #         static FIELDS: OnceLock<Vec<Field<Contact>>> = OnceLock::new();
//! #         FIELDS.get_or_init(|| vec![
//! #             Field::new("FirstName", |c: &Contact| &c.first_name, |c: &mut Contact| &mut c.first_name),
//! #         ])
//! #     }
//! # }
//!
//! let query = Query::<Contact>::new()
//!     .filter(member("FirstName").eq(lit("Tom")))
//!     .include(member("Address"))
//!     .unwrap();
//! assert_eq!(query.node().kind(), "Contact");
//! ```

use crate::entity::Entity;
use crate::error::{SDataError, SDataResult};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Host function invoked by the evaluator on already-evaluated arguments.
pub type HostFn = Arc<dyn Fn(&[Value]) -> SDataResult<Value> + Send + Sync>;

/// Reads captured local state at evaluation time.
pub type Thunk = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    AndAlso,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::And => "And",
            BinaryOp::AndAlso => "AndAlso",
            BinaryOp::Or => "Or",
            BinaryOp::Eq => "Equal",
            BinaryOp::Ne => "NotEqual",
            BinaryOp::Lt => "LessThan",
            BinaryOp::Le => "LessThanOrEqual",
            BinaryOp::Gt => "GreaterThan",
            BinaryOp::Ge => "GreaterThanOrEqual",
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Subtract",
            BinaryOp::Mul => "Multiply",
            BinaryOp::Div => "Divide",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum Expr {
    /// The bound variable: the element a predicate or selector is applied to.
    Param,
    Member {
        target: Box<Expr>,
        name: String,
    },
    Constant(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        function: HostFn,
        args: Vec<Expr>,
    },
    /// Captured host state; never references the bound variable.
    Capture {
        name: String,
        thunk: Thunk,
    },
    /// Anonymous record construction, e.g. `{FN: FirstName}` in a projection.
    Construct(Vec<(String, Expr)>),
}

impl Expr {
    pub fn member(self, name: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Le, self, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::And, self, rhs)
    }

    pub fn and_also(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::AndAlso, self, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Or, self, rhs)
    }

    /// True when `self` is a member access directly on the bound variable.
    pub fn direct_member_name(&self) -> Option<&str> {
        match self {
            Expr::Member { target, name } if matches!(**target, Expr::Param) => Some(name),
            _ => None,
        }
    }

    /// Whether the bound variable occurs anywhere in this expression.
    pub fn references_param(&self) -> bool {
        match self {
            Expr::Param => true,
            Expr::Member { target, .. } => target.references_param(),
            Expr::Constant(_) | Expr::Capture { .. } => false,
            Expr::Binary { left, right, .. } => {
                left.references_param() || right.references_param()
            }
            Expr::Call { args, .. } => args.iter().any(Expr::references_param),
            Expr::Construct(fields) => fields.iter().any(|(_, e)| e.references_param()),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param => write!(f, "x"),
            Expr::Member { target, name } => write!(f, "{:?}.{}", target, name),
            Expr::Constant(value) => write!(f, "{:?}", value),
            Expr::Binary { op, left, right } => write!(f, "({:?} {} {:?})", left, op, right),
            Expr::Call { name, args, .. } => f.debug_tuple(name).field(args).finish(),
            Expr::Capture { name, .. } => write!(f, "<captured {}>", name),
            Expr::Construct(fields) => {
                let mut map = f.debug_map();
                for (name, expr) in fields {
                    map.entry(name, expr);
                }
                map.finish()
            }
        }
    }
}

macro_rules! expr_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Constant(Value::from(value))
                }
            }
        )*
    };
}

expr_from_value!(Value, bool, i32, i64, f64, &str, String, DateTime<Utc>);

macro_rules! arithmetic_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> std::ops::$trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

arithmetic_op!(Add, add, BinaryOp::Add);
arithmetic_op!(Sub, sub, BinaryOp::Sub);
arithmetic_op!(Mul, mul, BinaryOp::Mul);
arithmetic_op!(Div, div, BinaryOp::Div);

pub fn param() -> Expr {
    Expr::Param
}

/// Member access directly on the bound variable.
pub fn member(name: impl Into<String>) -> Expr {
    Expr::Param.member(name)
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn capture<F>(name: impl Into<String>, thunk: F) -> Expr
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    Expr::Capture {
        name: name.into(),
        thunk: Arc::new(thunk),
    }
}

pub fn call<F>(name: impl Into<String>, function: F, args: Vec<Expr>) -> Expr
where
    F: Fn(&[Value]) -> SDataResult<Value> + Send + Sync + 'static,
{
    Expr::Call {
        name: name.into(),
        function: Arc::new(function),
        args,
    }
}

pub fn construct<I, S>(fields: I) -> Expr
where
    I: IntoIterator<Item = (S, Expr)>,
    S: Into<String>,
{
    Expr::Construct(
        fields
            .into_iter()
            .map(|(name, expr)| (name.into(), expr))
            .collect(),
    )
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    Source {
        kind: String,
    },
    Filter {
        input: Box<QueryNode>,
        predicate: Expr,
    },
    Project {
        input: Box<QueryNode>,
        selector: Expr,
    },
    Include {
        input: Box<QueryNode>,
        member: String,
    },
}

impl QueryNode {
    pub fn source(kind: impl Into<String>) -> Self {
        QueryNode::Source { kind: kind.into() }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        QueryNode::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn project(self, selector: Expr) -> Self {
        QueryNode::Project {
            input: Box::new(self),
            selector,
        }
    }

    /// Appends a related-member include. The selector must name a member
    /// directly on the bound variable.
    pub fn include(self, selector: Expr) -> SDataResult<Self> {
        let member = selector
            .direct_member_name()
            .ok_or_else(|| {
                SDataError::shape(format!(
                    "include expression {:?} does not refer to a member on the entity",
                    selector
                ))
            })?
            .to_string();
        Ok(QueryNode::Include {
            input: Box::new(self),
            member,
        })
    }

    /// Entity kind named by the chain's source.
    pub fn kind(&self) -> &str {
        match self {
            QueryNode::Source { kind } => kind,
            QueryNode::Filter { input, .. }
            | QueryNode::Project { input, .. }
            | QueryNode::Include { input, .. } => input.kind(),
        }
    }

    /// Include names in call order, duplicates kept.
    pub fn include_names(&self) -> Vec<&str> {
        let mut names = match self {
            QueryNode::Source { .. } => return Vec::new(),
            QueryNode::Filter { input, .. }
            | QueryNode::Project { input, .. }
            | QueryNode::Include { input, .. } => input.include_names(),
        };
        if let QueryNode::Include { member, .. } = self {
            names.push(member);
        }
        names
    }
}

/// Typed query over entity kind `E`, yielding tracked entities when executed.
#[derive(Debug, Clone)]
pub struct Query<E> {
    node: QueryNode,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Query<E> {
    pub fn new() -> Self {
        Self {
            node: QueryNode::source(E::KIND),
            _entity: PhantomData,
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        Self {
            node: self.node.filter(predicate),
            _entity: PhantomData,
        }
    }

    /// Narrows the transferred fields and reshapes each result client-side.
    pub fn select(self, selector: Expr) -> Projected<E> {
        Projected {
            node: self.node.project(selector),
            _entity: PhantomData,
        }
    }

    pub fn include(self, selector: Expr) -> SDataResult<Self> {
        Ok(Self {
            node: self.node.include(selector)?,
            _entity: PhantomData,
        })
    }

    pub fn node(&self) -> &QueryNode {
        &self.node
    }
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A query whose results pass through a projection selector.
#[derive(Debug, Clone)]
pub struct Projected<E> {
    node: QueryNode,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Projected<E> {
    pub fn include(self, selector: Expr) -> SDataResult<Self> {
        Ok(Self {
            node: self.node.include(selector)?,
            _entity: PhantomData,
        })
    }

    pub fn node(&self) -> &QueryNode {
        &self.node
    }
}
