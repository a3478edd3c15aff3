//! Host-side expression evaluation and partial evaluation.
//!
//! [`evaluate`] runs an expression against an optional bound value; it backs
//! both constant folding and the client-side projector. [`partial_eval`]
//! folds every maximal sub-expression that does not mention the bound
//! variable into a constant, so the translator only ever sees member
//! accesses and literals.

use crate::error::{SDataError, SDataResult};
use crate::query::ast::{BinaryOp, Expr, QueryNode};
use crate::value::{Record, Value};
use std::cmp::Ordering;

pub fn evaluate(expr: &Expr, bound: Option<&Value>) -> SDataResult<Value> {
    match expr {
        Expr::Param => bound
            .cloned()
            .ok_or_else(|| SDataError::evaluation("bound variable is not available")),
        Expr::Member { target, name } => {
            let target = evaluate(target, bound)?;
            match target {
                Value::Record(mut fields) => fields.remove(name).ok_or_else(|| {
                    SDataError::evaluation(format!("record has no member '{}'", name))
                }),
                other => Err(SDataError::evaluation(format!(
                    "cannot access member '{}' on {} value",
                    name,
                    other.type_name()
                ))),
            }
        }
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, bound),
        Expr::Call {
            function, args, ..
        } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, bound))
                .collect::<SDataResult<Vec<_>>>()?;
            function(&args)
        }
        Expr::Capture { thunk, .. } => Ok(thunk()),
        Expr::Construct(fields) => {
            let mut record = Record::new();
            for (name, field) in fields {
                record.insert(name.clone(), evaluate(field, bound)?);
            }
            Ok(Value::Record(record))
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    bound: Option<&Value>,
) -> SDataResult<Value> {
    match op {
        BinaryOp::AndAlso => {
            if !expect_bool(op, evaluate(left, bound)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(op, evaluate(right, bound)?)?))
        }
        BinaryOp::Or => {
            if expect_bool(op, evaluate(left, bound)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(op, evaluate(right, bound)?)?))
        }
        _ => {
            let lhs = evaluate(left, bound)?;
            let rhs = evaluate(right, bound)?;
            apply_binary(op, lhs, rhs)
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> SDataResult<Value> {
    match op {
        BinaryOp::And | BinaryOp::AndAlso => Ok(Value::Bool(
            expect_bool(op, lhs)? & expect_bool(op, rhs)?,
        )),
        BinaryOp::Or => Ok(Value::Bool(expect_bool(op, lhs)? | expect_bool(op, rhs)?)),
        BinaryOp::Eq => Ok(Value::Bool(lhs.loosely_equals(&rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!lhs.loosely_equals(&rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = lhs.compare(&rhs).ok_or_else(|| {
                SDataError::evaluation(format!(
                    "cannot compare {} with {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            apply_arithmetic(op, lhs, rhs)
        }
    }
}

fn apply_arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> SDataResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                _ => a.checked_div(b),
            };
            result.map(Value::Int).ok_or_else(|| {
                SDataError::evaluation(format!("integer {} of {} and {} failed", op, a, b))
            })
        }
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(a + &b)),
        (lhs, rhs) => {
            let (a, b) = match (as_float(&lhs), as_float(&rhs)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(SDataError::evaluation(format!(
                        "cannot apply {} to {} and {}",
                        op,
                        lhs.type_name(),
                        rhs.type_name()
                    )))
                }
            };
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            }))
        }
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn expect_bool(op: BinaryOp, value: Value) -> SDataResult<bool> {
    value.as_bool().ok_or_else(|| {
        SDataError::evaluation(format!(
            "{} expects boolean operands, got {}",
            op,
            value.type_name()
        ))
    })
}

/// Closedness of one node and, positionally, of its children.
struct Mark {
    closed: bool,
    children: Vec<Mark>,
}

fn nominate(expr: &Expr) -> Mark {
    let children: Vec<Mark> = match expr {
        Expr::Param | Expr::Constant(_) | Expr::Capture { .. } => Vec::new(),
        Expr::Member { target, .. } => vec![nominate(target)],
        Expr::Binary { left, right, .. } => vec![nominate(left), nominate(right)],
        Expr::Call { args, .. } => args.iter().map(nominate).collect(),
        Expr::Construct(fields) => fields.iter().map(|(_, e)| nominate(e)).collect(),
    };
    let closed = match expr {
        Expr::Param => false,
        _ => children.iter().all(|child| child.closed),
    };
    Mark { closed, children }
}

fn fold(expr: Expr, mark: &Mark) -> SDataResult<Expr> {
    if mark.closed {
        return Ok(Expr::Constant(evaluate(&expr, None)?));
    }
    let mut children = mark.children.iter();
    let mut next = |e: Expr| -> SDataResult<Expr> {
        match children.next() {
            Some(child) => fold(e, child),
            None => Ok(e),
        }
    };
    Ok(match expr {
        Expr::Member { target, name } => Expr::Member {
            target: Box::new(next(*target)?),
            name,
        },
        Expr::Binary { op, left, right } => {
            let left = next(*left)?;
            let right = next(*right)?;
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expr::Call {
            name,
            function,
            args,
        } => Expr::Call {
            name,
            function,
            args: args.into_iter().map(&mut next).collect::<SDataResult<_>>()?,
        },
        Expr::Construct(fields) => Expr::Construct(
            fields
                .into_iter()
                .map(|(name, e)| next(e).map(|folded| (name, folded)))
                .collect::<SDataResult<_>>()?,
        ),
        leaf => leaf,
    })
}

/// Replaces every maximal closed sub-expression with its value.
///
/// A predicate that is closed as a whole is returned untouched.
pub fn partial_eval(expr: Expr) -> SDataResult<Expr> {
    let mark = nominate(&expr);
    if mark.closed {
        return Ok(expr);
    }
    fold(expr, &mark)
}

/// Partially evaluates every predicate and selector in a query chain.
pub fn partial_eval_node(node: QueryNode) -> SDataResult<QueryNode> {
    Ok(match node {
        QueryNode::Source { .. } => node,
        QueryNode::Filter { input, predicate } => QueryNode::Filter {
            input: Box::new(partial_eval_node(*input)?),
            predicate: partial_eval(predicate)?,
        },
        QueryNode::Project { input, selector } => QueryNode::Project {
            input: Box::new(partial_eval_node(*input)?),
            selector: partial_eval(selector)?,
        },
        QueryNode::Include { input, member } => QueryNode::Include {
            input: Box::new(partial_eval_node(*input)?),
            member,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{call, capture, construct, lit, member};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn contact() -> Value {
        let mut fields = Record::new();
        fields.insert("FirstName".to_string(), Value::from("Tom"));
        fields.insert("Age".to_string(), Value::Int(42));
        Value::Record(fields)
    }

    #[test]
    fn test_evaluate_against_bound_record() {
        let bound = contact();
        let predicate = member("FirstName").eq("Tom").and_also(member("Age").gt(40));
        assert_eq!(evaluate(&predicate, Some(&bound)).unwrap(), Value::Bool(true));

        let selector = construct([("FN", member("FirstName"))]);
        let shaped = evaluate(&selector, Some(&bound)).unwrap();
        assert_eq!(shaped.get("FN"), Some(&Value::from("Tom")));
        assert_eq!(shaped.get("Age"), None);
    }

    #[test]
    fn test_evaluate_errors() {
        assert!(evaluate(&member("FirstName"), None).is_err());
        assert!(evaluate(&member("Missing"), Some(&contact())).is_err());
        assert!(evaluate(&(lit(1) / lit(0)), None).is_err());
        assert!(evaluate(&lit("a").lt(1), None).is_err());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(evaluate(&(lit(2) + lit(3)), None).unwrap(), Value::Int(5));
        assert_eq!(evaluate(&(lit(7) / lit(2)), None).unwrap(), Value::Int(3));
        assert_eq!(
            evaluate(&(lit(1) * lit(2.5)), None).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            evaluate(&(lit("Sm") + lit("ith")), None).unwrap(),
            Value::from("Smith")
        );
    }

    #[test]
    fn test_partial_eval_folds_captured_value() {
        let name = "Tom".to_string();
        let predicate = member("FirstName").eq(capture("name", move || Value::from(name.clone())));
        let folded = partial_eval(predicate).unwrap();
        match folded {
            Expr::Binary { right, .. } => {
                assert!(matches!(*right, Expr::Constant(Value::Text(ref s)) if s == "Tom"))
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_partial_eval_folds_maximal_subtree_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = call(
            "base",
            move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(Value::Int(10))
            },
            vec![],
        );
        let predicate = member("Age").gt(base + lit(5));
        let folded = partial_eval(predicate).unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(format!("{:?}", folded), "(x.Age GreaterThan Int(15))");
    }

    #[test]
    fn test_partial_eval_leaves_closed_root_alone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let predicate = capture("flag", move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Value::Bool(true)
        });
        let result = partial_eval(predicate).unwrap();
        assert!(matches!(result, Expr::Capture { .. }));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_partial_eval_node_rewrites_every_clause() {
        let limit = 30;
        let node = QueryNode::source("Contact")
            .filter(member("Age").lt(capture("limit", move || Value::Int(limit))))
            .project(construct([
                ("FN", member("FirstName")),
                ("Tag", lit("v") + lit("1")),
            ]));
        let folded = partial_eval_node(node).unwrap();
        match folded {
            QueryNode::Project { input, selector } => {
                assert_eq!(
                    format!("{:?}", selector),
                    "{\"FN\": x.FirstName, \"Tag\": Text(\"v1\")}"
                );
                match *input {
                    QueryNode::Filter { predicate, .. } => assert_eq!(
                        format!("{:?}", predicate),
                        "(x.Age LessThan Int(30))"
                    ),
                    other => panic!("unexpected node: {:?}", other),
                }
            }
            other => panic!("unexpected node: {:?}", other),
        }
    }
}
