pub mod ast;
pub mod eval;
pub mod projector;
pub mod translator;

pub use ast::{
    call, capture, construct, lit, member, param, BinaryOp, Expr, HostFn, Projected, Query,
    QueryNode, Thunk,
};
pub use eval::{evaluate, partial_eval, partial_eval_node};
pub use projector::{project_properties, PropertyProjection};
pub use translator::{format_constant, translate_predicate, TranslationResult, Translator};
