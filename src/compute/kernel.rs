//! The expression kernel shared by every engine: evaluates one bound formula
//! in the context of one instance.

use super::index::RowList;
use super::ledger::FieldError;
use crate::formula::{Aggregate, AggregateOp, BinaryOp, BoundExpr, Function, UnaryOp};
use crate::store::Value;
use std::cmp::Ordering;

/// Access to the values an expression may read while evaluating one row.
///
/// Engines differ only in how these reads are satisfied: the eager engine
/// reads cells that are already settled, the lazy engine resolves them on demand.
pub trait RowContext {
    /// A field of the current row.
    fn local(&mut self, field: usize) -> Result<Value, FieldError>;
    /// A field of the single parent row found through `rel`.
    fn parent(&mut self, rel: usize, field: usize) -> Result<Value, FieldError>;
    /// Child rows of the current row through `rel`, in load order.
    fn children(&mut self, rel: usize) -> Result<RowList, FieldError>;
    /// A field of one child row found through `rel`.
    fn child(&mut self, rel: usize, row: usize, field: usize) -> Result<Value, FieldError>;
}

pub fn eval<C: RowContext>(expr: &BoundExpr, ctx: &mut C) -> Result<Value, FieldError> {
    match expr {
        BoundExpr::Const(v) => Ok(v.clone()),
        BoundExpr::Local(field) => ctx.local(*field),
        BoundExpr::Parent { rel, field } => ctx.parent(*rel, *field),
        BoundExpr::Unary(UnaryOp::Neg, e) => match eval(e, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(mismatch("-", &[&other])),
        },
        BoundExpr::Binary(op, l, r) => {
            let l = eval(l, ctx)?;
            let r = eval(r, ctx)?;
            binary(*op, l, r)
        }
        BoundExpr::Func(func, args) => call(*func, args, ctx),
        BoundExpr::Aggregate(agg) => aggregate(agg, ctx),
    }
}

fn mismatch(operation: &str, values: &[&Value]) -> FieldError {
    let found: Vec<&str> = values.iter().map(|v| v.type_name()).collect();
    FieldError::TypeMismatch { operation: operation.to_string(), found: found.join(" and ") }
}

fn finite(n: f64) -> Result<Value, FieldError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(FieldError::NonFinite)
    }
}

/// Equality as used by `=`, `<>` and aggregate criteria. Null equals only null.
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => l == r,
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, FieldError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => return compare(op, &l, &r),
        _ => {}
    }

    let (a, b) = match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => (*a, *b),
        (Value::Null | Value::Number(_), Value::Null | Value::Number(_)) => return Ok(Value::Null),
        _ => return Err(mismatch(op.symbol(), &[&l, &r])),
    };
    match op {
        BinaryOp::Add => finite(a + b),
        BinaryOp::Sub => finite(a - b),
        BinaryOp::Mul => finite(a * b),
        BinaryOp::Div if b == 0.0 => Err(FieldError::DivisionByZero),
        BinaryOp::Div => finite(a / b),
        BinaryOp::Pow => power(a, b),
        _ => Err(mismatch(op.symbol(), &[&l, &r])),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, FieldError> {
    let ordering = match (l, r) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => return Err(mismatch(op.symbol(), &[l, r])),
    };
    let Some(ordering) = ordering else { return Ok(Value::Null) };
    let holds = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Value::Bool(holds))
}

fn power(base: f64, exp: f64) -> Result<Value, FieldError> {
    if base == 0.0 && exp < 0.0 {
        return Err(FieldError::DivisionByZero);
    }
    finite(base.powf(exp))
}

/// Evaluates every argument as a number. `None` if any argument is null.
fn numbers<C: RowContext>(func: Function, args: &[BoundExpr], ctx: &mut C) -> Result<Option<Vec<f64>>, FieldError> {
    let mut out = Vec::with_capacity(args.len());
    let mut saw_null = false;
    for arg in args {
        match eval(arg, ctx)? {
            Value::Number(n) => out.push(n),
            Value::Null => saw_null = true,
            other => return Err(mismatch(func.name(), &[&other])),
        }
    }
    Ok(if saw_null { None } else { Some(out) })
}

fn call<C: RowContext>(func: Function, args: &[BoundExpr], ctx: &mut C) -> Result<Value, FieldError> {
    if func == Function::If {
        // Only the selected branch is evaluated.
        let take_first = match eval(&args[0], ctx)? {
            Value::Null => return Ok(Value::Null),
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0,
            other => return Err(mismatch("IF", &[&other])),
        };
        return eval(if take_first { &args[1] } else { &args[2] }, ctx);
    }

    let Some(x) = numbers(func, args, ctx)? else { return Ok(Value::Null) };
    match func {
        Function::Power => power(x[0], x[1]),
        Function::Log10 | Function::Ln if x[0] <= 0.0 => Err(FieldError::Domain { function: func.name(), argument: x[0] }),
        Function::Log10 => finite(x[0].log10()),
        Function::Ln => finite(x[0].ln()),
        Function::Exp => finite(x[0].exp()),
        Function::Abs => finite(x[0].abs()),
        Function::Sqrt if x[0] < 0.0 => Err(FieldError::Domain { function: func.name(), argument: x[0] }),
        Function::Sqrt => finite(x[0].sqrt()),
        Function::Round => finite(round_half_away(x[0], x[1].trunc() as i32)),
        Function::Min => finite(x.iter().copied().fold(f64::INFINITY, f64::min)),
        Function::Max => finite(x.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Function::If => Ok(Value::Null),
    }
}

/// Rounds half away from zero to `digits` decimal places (negative digits round
/// to tens, hundreds, ...).
pub fn round_half_away(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / factor
}

fn aggregate<C: RowContext>(agg: &Aggregate, ctx: &mut C) -> Result<Value, FieldError> {
    let rows = ctx.children(agg.rel)?;
    let criteria = agg
        .filters
        .iter()
        .map(|(field, expr)| Ok((*field, eval(expr, ctx)?)))
        .collect::<Result<Vec<_>, FieldError>>()?;

    let mut count = 0usize;
    let mut sum = 0.0;
    let mut extreme: Option<f64> = None;

    'rows: for &row in &rows {
        for (field, criterion) in &criteria {
            if !values_equal(&ctx.child(agg.rel, row, *field)?, criterion) {
                continue 'rows;
            }
        }
        let Some(target) = agg.target else {
            count += 1;
            continue;
        };
        match ctx.child(agg.rel, row, target)? {
            Value::Null => {}
            Value::Number(n) => {
                count += 1;
                sum += n;
                extreme = Some(match (agg.op, extreme) {
                    (AggregateOp::Min, Some(e)) => e.min(n),
                    (AggregateOp::Max, Some(e)) => e.max(n),
                    _ => n,
                });
            }
            _ if agg.op == AggregateOp::Count => count += 1,
            other => return Err(mismatch(agg.op.name(), &[&other])),
        }
    }

    match agg.op {
        AggregateOp::Count => Ok(Value::Number(count as f64)),
        AggregateOp::Sum => finite(sum),
        AggregateOp::Min | AggregateOp::Max => extreme.map_or(Ok(Value::Null), finite),
        AggregateOp::Average if count == 0 => Ok(Value::Null),
        AggregateOp::Average => finite(sum / count as f64),
    }
}
