//! Syntax tree produced by the parser and the bound form evaluated by the engines.

use crate::store::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// A field reference as written: `Field`, `rel.Field`, `{{Field}}` or `table!{{Field}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub qualifier: Option<String>,
    pub name: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Unbound syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Ref(Reference),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Function name is stored upper-cased.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Every reference in the tree, in source order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Ref(r) => out.push(r),
            Expr::Unary(_, e) => e.collect_refs(out),
            Expr::Binary(_, l, r) => {
                l.collect_refs(out);
                r.collect_refs(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_refs(out)),
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) => {}
        }
    }
}

/// Scalar functions available in every formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Power,
    Log10,
    Ln,
    Exp,
    Abs,
    Sqrt,
    Round,
    If,
    Min,
    Max,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "POWER" => Function::Power,
            "LOG10" => Function::Log10,
            "LN" => Function::Ln,
            "EXP" => Function::Exp,
            "ABS" => Function::Abs,
            "SQRT" => Function::Sqrt,
            "ROUND" => Function::Round,
            "IF" => Function::If,
            "MIN" => Function::Min,
            "MAX" => Function::Max,
            _ => return None,
        })
    }

    /// Accepted argument counts as (min, max); `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Power | Function::Round => (2, Some(2)),
            Function::Log10 | Function::Ln | Function::Exp | Function::Abs | Function::Sqrt => (1, Some(1)),
            Function::If => (3, Some(3)),
            Function::Min | Function::Max => (1, None),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Power => "POWER",
            Function::Log10 => "LOG10",
            Function::Ln => "LN",
            Function::Exp => "EXP",
            Function::Abs => "ABS",
            Function::Sqrt => "SQRT",
            Function::Round => "ROUND",
            Function::If => "IF",
            Function::Min => "MIN",
            Function::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateOp {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOp::Count => "COUNT",
            AggregateOp::Sum => "SUM",
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
            AggregateOp::Average => "AVERAGE",
        }
    }
}

/// A reduction over the child rows of one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub op: AggregateOp,
    /// Index into the declaring entity's relationships.
    pub rel: usize,
    /// Child field being reduced; `None` for a plain row count.
    pub target: Option<usize>,
    /// Child rows are kept only when `child[field] = criterion` for every pair.
    pub filters: Vec<(usize, BoundExpr)>,
}

/// A formula bound against its entity: every name is resolved to an index.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    Const(Value),
    /// Field index on the same entity.
    Local(usize),
    /// Field index on the parent found through relationship `rel`.
    Parent { rel: usize, field: usize },
    Unary(UnaryOp, Box<BoundExpr>),
    Binary(BinaryOp, Box<BoundExpr>, Box<BoundExpr>),
    Func(Function, Vec<BoundExpr>),
    Aggregate(Box<Aggregate>),
}

impl BoundExpr {
    pub fn contains_aggregate(&self) -> bool {
        match self {
            BoundExpr::Aggregate(_) => true,
            BoundExpr::Unary(_, e) => e.contains_aggregate(),
            BoundExpr::Binary(_, l, r) => l.contains_aggregate() || r.contains_aggregate(),
            BoundExpr::Func(_, args) => args.iter().any(|a| a.contains_aggregate()),
            BoundExpr::Const(_) | BoundExpr::Local(_) | BoundExpr::Parent { .. } => false,
        }
    }
}
