use crate::query::ast::Expr;

/// Server-side field list extracted from a projection selector.
#[derive(Debug, Clone)]
pub struct PropertyProjection {
    /// Comma-joined member names, in visitation order.
    pub properties: String,
    /// The selector itself, applied to each materialized entity client-side.
    pub selector: Expr,
}

/// Collects the members a selector reads directly off the bound variable.
pub fn project_properties(selector: &Expr) -> PropertyProjection {
    let mut names = Vec::new();
    collect_direct_members(selector, &mut names);
    PropertyProjection {
        properties: names.join(","),
        selector: selector.clone(),
    }
}

fn collect_direct_members<'a>(expr: &'a Expr, names: &mut Vec<&'a str>) {
    if let Some(name) = expr.direct_member_name() {
        names.push(name);
        return;
    }
    match expr {
        Expr::Member { target, .. } => collect_direct_members(target, names),
        Expr::Binary { left, right, .. } => {
            collect_direct_members(left, names);
            collect_direct_members(right, names);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_direct_members(arg, names);
            }
        }
        Expr::Construct(fields) => {
            for (_, field) in fields {
                collect_direct_members(field, names);
            }
        }
        Expr::Param | Expr::Constant(_) | Expr::Capture { .. } => {}
    }
}
