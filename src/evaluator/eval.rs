//! Tree-walking evaluator for the `Expr`/`Stmt` grammar. Grounded on the
//! teacher's `interpreter::eval` walker, but every dispatch point here is
//! closed over the small whitelist grammar in `ast` rather than a general
//! AST, and every `Name`/`Attr` resolution runs through
//! `reject_underscore_name` before it touches the context.

use std::rc::Rc;

use super::ast::{BinOp, BoolOp, CmpOp, Expr, Literal, Stmt, Target, UnaryOp};
use super::{builtins, reject_underscore_name};
use crate::error::{ControlFlow, Result, TemplateError};
use crate::value::{Context, Value};

pub fn eval_expr(expr: &Expr, ctx: &Context) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),
        Expr::Name(name) => {
            reject_underscore_name(name)?;
            Ok(ctx.get(name))
        }
        Expr::Attr(base, name) => {
            reject_underscore_name(name)?;
            Ok(eval_expr(base, ctx)?.get_attr(name))
        }
        Expr::Index(base, idx) => {
            let b = eval_expr(base, ctx)?;
            let i = eval_expr(idx, ctx)?;
            Ok(b.get_index(&i))
        }
        Expr::Slice(base, start, stop, step) => eval_slice(base, start, stop, step, ctx),
        Expr::Call { callee, args, kwargs } => eval_call(callee, args, kwargs, ctx),
        Expr::BinOp(l, op, r) => binop(*op, &eval_expr(l, ctx)?, &eval_expr(r, ctx)?),
        Expr::Compare(first, rest) => eval_compare(first, rest, ctx),
        Expr::BoolOp(op, terms) => eval_bool_op(*op, terms, ctx),
        Expr::Unary(op, operand) => eval_unary(*op, &eval_expr(operand, ctx)?),
        Expr::Ternary { body, test, orelse } => {
            if eval_expr(test, ctx)?.is_truthy() {
                eval_expr(body, ctx)
            } else {
                eval_expr(orelse, ctx)
            }
        }
        Expr::List(items) => Ok(Value::list(eval_all(items, ctx)?)),
        Expr::Tuple(items) => Ok(Value::list(eval_all(items, ctx)?)),
        Expr::Set(items) => {
            let mut out: Vec<Value> = Vec::new();
            for item in eval_all(items, ctx)? {
                if !out.iter().any(|v| v.equals(&item)) {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        Expr::Dict(pairs) => {
            let mut map = crate::value::Map::new();
            for (k, v) in pairs {
                let key = eval_expr(k, ctx)?;
                let key = key.as_str().map(|s| s.to_string()).unwrap_or_else(|| key.to_display_string());
                map.insert(key, eval_expr(v, ctx)?);
            }
            Ok(Value::Map(Rc::new(std::cell::RefCell::new(map))))
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

fn eval_all(items: &[Expr], ctx: &Context) -> Result<Vec<Value>> {
    items.iter().map(|e| eval_expr(e, ctx)).collect()
}

fn eval_slice(
    base: &Expr,
    start: &Option<Box<Expr>>,
    stop: &Option<Box<Expr>>,
    step: &Option<Box<Expr>>,
    ctx: &Context,
) -> Result<Value> {
    let base_val = eval_expr(base, ctx)?;
    let step = match step {
        Some(e) => eval_expr(e, ctx)?.as_int().unwrap_or(1),
        None => 1,
    };
    if step == 0 {
        return Err(TemplateError::syntax("slice step cannot be zero"));
    }
    let items: Vec<Value> = match &base_val {
        Value::List(l) => l.borrow().clone(),
        Value::String(s) | Value::SafeString(s) => {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        }
        _ => return Ok(Value::Null),
    };
    let len = items.len() as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (i + len).max(0)
        } else {
            i.min(len)
        }
    };
    let (lo, hi) = if step > 0 {
        let lo = start.as_ref().map(|e| eval_expr(e, ctx)).transpose()?.and_then(|v| v.as_int()).map(norm).unwrap_or(0);
        let hi = stop.as_ref().map(|e| eval_expr(e, ctx)).transpose()?.and_then(|v| v.as_int()).map(norm).unwrap_or(len);
        (lo, hi)
    } else {
        let lo = start.as_ref().map(|e| eval_expr(e, ctx)).transpose()?.and_then(|v| v.as_int()).map(norm).unwrap_or(len - 1);
        let hi = stop.as_ref().map(|e| eval_expr(e, ctx)).transpose()?.and_then(|v| v.as_int()).map(norm).unwrap_or(-1);
        (lo, hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = lo;
        while i < hi {
            if i >= 0 && i < len {
                out.push(items[i as usize].clone());
            }
            i += step;
        }
    } else {
        let mut i = lo;
        while i > hi {
            if i >= 0 && i < len {
                out.push(items[i as usize].clone());
            }
            i += step;
        }
    }
    if matches!(base_val, Value::String(_) | Value::SafeString(_)) {
        Ok(Value::String(out.iter().map(|v| v.to_display_string()).collect()))
    } else {
        Ok(Value::list(out))
    }
}

fn eval_call(callee: &Expr, args: &[Expr], kwargs: &[(String, Expr)], ctx: &Context) -> Result<Value> {
    // `prepare_source` rewrites a bare reserved word like `class` into the
    // textual call `ctx.get("class","")`; recognise that exact shape here
    // rather than binding a real `ctx` value into every context.
    if let Expr::Attr(base, method) = callee {
        if method == "get" {
            if let Expr::Name(n) = base.as_ref() {
                if n == "ctx" {
                    if args.len() != 2 || !kwargs.is_empty() {
                        return Err(TemplateError::syntax("ctx.get() takes exactly two arguments"));
                    }
                    let key = eval_expr(&args[0], ctx)?;
                    let key = key
                        .as_str()
                        .ok_or_else(|| TemplateError::syntax("ctx.get() key must be a string"))?;
                    return Ok(if ctx.contains(key) {
                        ctx.get(key)
                    } else {
                        eval_expr(&args[1], ctx)?
                    });
                }
            }
        }
    }
    if let Expr::Name(name) = callee {
        if name == "isset" {
            if args.len() != 1 || !kwargs.is_empty() {
                return Err(TemplateError::syntax("isset() takes exactly one argument"));
            }
            return Ok(Value::Bool(path_exists(&args[0], ctx)?));
        }
        if name == "default" {
            if args.len() != 2 {
                return Err(TemplateError::syntax("default() takes exactly two arguments"));
            }
            let value = eval_expr(&args[0], ctx)?;
            return if value.is_truthy() {
                Ok(value)
            } else {
                eval_expr(&args[1], ctx)
            };
        }
        if builtins::is_builtin(name) {
            let arg_vals = eval_all(args, ctx)?;
            let kwarg_vals: Vec<(String, Value)> = kwargs
                .iter()
                .map(|(k, e)| eval_expr(e, ctx).map(|v| (k.clone(), v)))
                .collect::<Result<_>>()?;
            return builtins::call(name, &arg_vals, &kwarg_vals, ctx);
        }
        reject_underscore_name(name)?;
    }
    let callee_val = eval_expr(callee, ctx)?;
    let Value::Callable(f) = callee_val else {
        return Err(TemplateError::syntax("value is not callable"));
    };
    if !kwargs.is_empty() {
        return Err(TemplateError::syntax("keyword arguments are not supported on host callables"));
    }
    let arg_vals = eval_all(args, ctx)?;
    f(&arg_vals, ctx)
}

/// Whether `expr` denotes something actually bound, without evaluating a
/// missing path into a silent `Null` the way ordinary lookups do.
pub(crate) fn path_exists(expr: &Expr, ctx: &Context) -> Result<bool> {
    match expr {
        Expr::Name(name) => Ok(ctx.contains(name) && !ctx.get(name).is_null()),
        Expr::Attr(base, name) => {
            if !path_exists(base, ctx)? {
                return Ok(false);
            }
            let base_val = eval_expr(base, ctx)?;
            Ok(match &base_val {
                Value::Map(m) => m.borrow().contains_key(name),
                Value::Host(h) => h.get_attr(name).is_some(),
                _ => false,
            })
        }
        Expr::Index(base, idx) => {
            if !path_exists(base, ctx)? {
                return Ok(false);
            }
            let base_val = eval_expr(base, ctx)?;
            let idx_val = eval_expr(idx, ctx)?;
            Ok(match &base_val {
                Value::Map(m) => idx_val.as_str().is_some_and(|k| m.borrow().contains_key(k)),
                Value::List(l) => {
                    let len = l.borrow().len() as i64;
                    idx_val.as_int().is_some_and(|i| {
                        let i = if i < 0 { i + len } else { i };
                        i >= 0 && i < len
                    })
                }
                _ => false,
            })
        }
        _ => Ok(!eval_expr(expr, ctx)?.is_null()),
    }
}

fn eval_compare(first: &Expr, rest: &[(CmpOp, Expr)], ctx: &Context) -> Result<Value> {
    let mut prev = eval_expr(first, ctx)?;
    for (op, rhs_expr) in rest {
        let rhs = eval_expr(rhs_expr, ctx)?;
        if !compare_single(*op, &prev, &rhs)? {
            return Ok(Value::Bool(false));
        }
        prev = rhs;
    }
    Ok(Value::Bool(true))
}

fn compare_single(op: CmpOp, l: &Value, r: &Value) -> Result<bool> {
    Ok(match op {
        CmpOp::Eq => l.equals(r),
        CmpOp::Ne => !l.equals(r),
        CmpOp::Is => l.equals(r) || (l.is_null() && r.is_null()),
        CmpOp::IsNot => !(l.equals(r) || (l.is_null() && r.is_null())),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = l.partial_cmp(r).ok_or_else(|| {
                TemplateError::syntax(format!(
                    "'{}' and '{}' are not orderable",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            }
        }
        CmpOp::In | CmpOp::NotIn => {
            let found = match r {
                Value::List(items) => items.borrow().iter().any(|v| v.equals(l)),
                Value::Map(m) => l.as_str().is_some_and(|k| m.borrow().contains_key(k)),
                Value::String(s) | Value::SafeString(s) => {
                    l.as_str().is_some_and(|needle| s.contains(needle))
                }
                _ => {
                    return Err(TemplateError::syntax(format!(
                        "argument of type '{}' is not iterable",
                        r.type_name()
                    )))
                }
            };
            if op == CmpOp::In {
                found
            } else {
                !found
            }
        }
    })
}

fn eval_bool_op(op: BoolOp, terms: &[Expr], ctx: &Context) -> Result<Value> {
    let mut last = Value::Null;
    for term in terms {
        let v = eval_expr(term, ctx)?;
        match op {
            BoolOp::Or if v.is_truthy() => return Ok(v),
            BoolOp::And if !v.is_truthy() => return Ok(v),
            _ => {}
        }
        last = v;
    }
    Ok(last)
}

fn eval_unary(op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Plus => match v {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Float(n) => Ok(Value::Float(*n)),
            _ => Err(unsupported_unary("+", v)),
        },
        UnaryOp::Neg => match v {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(n) => Ok(Value::Float(-n)),
            _ => Err(unsupported_unary("-", v)),
        },
    }
}

fn unsupported_unary(op: &str, v: &Value) -> TemplateError {
    TemplateError::syntax(format!("bad operand type for unary {op}: '{}'", v.type_name()))
}

pub fn binop(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    use Value::*;
    if op == BinOp::Add {
        match (l, r) {
            (String(a) | SafeString(a), String(b) | SafeString(b)) => {
                return Ok(Value::String(format!("{a}{b}")))
            }
            (List(a), List(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                return Ok(Value::list(out));
            }
            _ => {}
        }
    }
    let (Some(lf), Some(rf)) = (l.as_float(), r.as_float()) else {
        return Err(TemplateError::syntax(format!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        )));
    };
    let both_int = matches!(l, Int(_)) && matches!(r, Int(_));
    match op {
        BinOp::Add => Ok(if both_int {
            Value::Int(l.as_int().unwrap() + r.as_int().unwrap())
        } else {
            Value::Float(lf + rf)
        }),
        BinOp::Sub => Ok(if both_int {
            Value::Int(l.as_int().unwrap() - r.as_int().unwrap())
        } else {
            Value::Float(lf - rf)
        }),
        BinOp::Mul => Ok(if both_int {
            Value::Int(l.as_int().unwrap() * r.as_int().unwrap())
        } else {
            Value::Float(lf * rf)
        }),
        BinOp::Div => {
            if rf == 0.0 {
                return Err(TemplateError::syntax("division by zero"));
            }
            Ok(Value::Float(lf / rf))
        }
        BinOp::FloorDiv => {
            if rf == 0.0 {
                return Err(TemplateError::syntax("division by zero"));
            }
            Ok(if both_int {
                Value::Int((lf / rf).floor() as i64)
            } else {
                Value::Float((lf / rf).floor())
            })
        }
        BinOp::Mod => {
            if rf == 0.0 {
                return Err(TemplateError::syntax("modulo by zero"));
            }
            let m = lf - rf * (lf / rf).floor();
            Ok(if both_int { Value::Int(m as i64) } else { Value::Float(m) })
        }
        BinOp::Pow => {
            if both_int && r.as_int().unwrap() >= 0 {
                Ok(Value::Int(l.as_int().unwrap().pow(r.as_int().unwrap() as u32)))
            } else {
                Ok(Value::Float(lf.powf(rf)))
            }
        }
    }
}

pub fn exec_block(stmts: &[Stmt], ctx: &Context) -> Result<Option<ControlFlow>> {
    for stmt in stmts {
        if let Some(cf) = exec_stmt(stmt, ctx)? {
            return Ok(Some(cf));
        }
    }
    Ok(None)
}

pub fn exec_stmt(stmt: &Stmt, ctx: &Context) -> Result<Option<ControlFlow>> {
    match stmt {
        Stmt::Expr(e) => {
            eval_expr(e, ctx)?;
            Ok(None)
        }
        Stmt::Assign(target, e) => {
            let v = eval_expr(e, ctx)?;
            assign_target(target, v, ctx)?;
            Ok(None)
        }
        Stmt::AugAssign(target, op, e) => {
            let current = eval_expr(&target_to_expr(target), ctx)?;
            let rhs = eval_expr(e, ctx)?;
            let updated = binop(*op, &current, &rhs)?;
            assign_target(target, updated, ctx)?;
            Ok(None)
        }
        Stmt::If { branches, orelse } => {
            for (test, body) in branches {
                if eval_expr(test, ctx)?.is_truthy() {
                    return exec_block(body, ctx);
                }
            }
            exec_block(orelse, ctx)
        }
        Stmt::For { var, iter, body } => {
            reject_underscore_name(var)?;
            let iter_val = eval_expr(iter, ctx)?;
            for item in iterable_items(&iter_val)? {
                ctx.set(var, item);
                match exec_block(body, ctx)? {
                    Some(ControlFlow::Break) => break,
                    Some(ControlFlow::Continue) | None => {}
                }
            }
            Ok(None)
        }
        Stmt::While { test, body } => {
            while eval_expr(test, ctx)?.is_truthy() {
                match exec_block(body, ctx)? {
                    Some(ControlFlow::Break) => break,
                    Some(ControlFlow::Continue) | None => {}
                }
            }
            Ok(None)
        }
        Stmt::Break => Ok(Some(ControlFlow::Break)),
        Stmt::Continue => Ok(Some(ControlFlow::Continue)),
        Stmt::Pass => Ok(None),
    }
}

fn target_to_expr(target: &Target) -> Expr {
    match target {
        Target::Name(n) => Expr::Name(n.clone()),
        Target::Attr(base, n) => Expr::Attr(base.clone(), n.clone()),
        Target::Index(base, idx) => Expr::Index(base.clone(), idx.clone()),
    }
}

fn assign_target(target: &Target, value: Value, ctx: &Context) -> Result<()> {
    match target {
        Target::Name(name) => {
            reject_underscore_name(name)?;
            ctx.set(name, value);
            Ok(())
        }
        Target::Attr(base, name) => {
            reject_underscore_name(name)?;
            match eval_expr(base, ctx)? {
                Value::Map(m) => {
                    m.borrow_mut().insert(name.clone(), value);
                    Ok(())
                }
                other => Err(TemplateError::syntax(format!(
                    "cannot set attribute on '{}'",
                    other.type_name()
                ))),
            }
        }
        Target::Index(base, idx) => {
            let base_val = eval_expr(base, ctx)?;
            let idx_val = eval_expr(idx, ctx)?;
            match &base_val {
                Value::Map(m) => {
                    let key = idx_val
                        .as_str()
                        .ok_or_else(|| TemplateError::syntax("map keys must be strings"))?;
                    m.borrow_mut().insert(key.to_string(), value);
                    Ok(())
                }
                Value::List(l) => {
                    let mut list = l.borrow_mut();
                    let len = list.len() as i64;
                    let mut i = idx_val
                        .as_int()
                        .ok_or_else(|| TemplateError::syntax("list indices must be integers"))?;
                    if i < 0 {
                        i += len;
                    }
                    if i < 0 || i >= len {
                        return Err(TemplateError::syntax("list assignment index out of range"));
                    }
                    list[i as usize] = value;
                    Ok(())
                }
                other => Err(TemplateError::syntax(format!(
                    "'{}' does not support item assignment",
                    other.type_name()
                ))),
            }
        }
    }
}

pub(crate) fn iterable_items(v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Map(m) => Ok(m.borrow().keys().map(|k| Value::String(k.clone())).collect()),
        Value::String(s) | Value::SafeString(s) => {
            Ok(s.chars().map(|c| Value::String(c.to_string())).collect())
        }
        other => Err(TemplateError::syntax(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{eval_expression, eval_statements};

    #[test]
    fn arithmetic_and_precedence() {
        let ctx = Context::new();
        assert_eq!(eval_expression("1 + 2 * 3", &ctx).unwrap().as_int(), Some(7));
    }

    #[test]
    fn string_concatenation() {
        let ctx = Context::new();
        ctx.set("name", Value::String("ada".into()));
        assert_eq!(
            eval_expression("'hi ' + name", &ctx).unwrap().as_str(),
            Some("hi ada")
        );
    }

    #[test]
    fn isset_requires_defined_and_non_null() {
        let ctx = Context::new();
        ctx.set("present", Value::Int(1));
        ctx.set("null_present", Value::Null);
        assert!(eval_expression("isset(present)", &ctx).unwrap().is_truthy());
        assert!(!eval_expression("isset(null_present)", &ctx).unwrap().is_truthy());
        assert!(!eval_expression("isset(missing)", &ctx).unwrap().is_truthy());
    }

    #[test]
    fn default_falls_back_on_any_falsy_value() {
        let ctx = Context::new();
        assert_eq!(
            eval_expression("default('', 'x')", &ctx).unwrap().as_str(),
            Some("x")
        );
        assert_eq!(eval_expression("default(0, 5)", &ctx).unwrap().as_int(), Some(5));
    }

    #[test]
    fn default_falls_back_on_null() {
        let ctx = Context::new();
        assert_eq!(
            eval_expression("default(missing, 'x')", &ctx).unwrap().as_str(),
            Some("x")
        );
    }

    #[test]
    fn underscore_names_are_rejected() {
        let ctx = Context::new();
        assert!(eval_expression("_secret", &ctx).is_err());
        assert!(eval_expression("obj.__class__", &ctx).is_err());
    }

    #[test]
    fn python_block_accumulates_total() {
        let ctx = Context::new();
        ctx.set("items", Value::list([Value::Int(1), Value::Int(2), Value::Int(3)]));
        eval_statements("total = 0\nfor item in items:\n    total += item\n", &ctx).unwrap();
        assert_eq!(ctx.get("total").as_int(), Some(6));
    }

    #[test]
    fn while_break_stops_loop() {
        let ctx = Context::new();
        eval_statements("n = 0\nwhile True:\n    n += 1\n    if n == 3:\n        break\n", &ctx)
            .unwrap();
        assert_eq!(ctx.get("n").as_int(), Some(3));
    }
}
