//! The curated safe-builtin table (spec.md §4.2). `isset` and `default` are
//! listed here for classification purposes only — `eval::eval_call`
//! intercepts both before they ever reach `call`, since they need the
//! unevaluated argument AST.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::error::{Result, TemplateError};
use crate::value::{Context, Map, Value};

const NAMES: &[&str] = &[
    "str", "int", "float", "bool", "list", "dict", "tuple", "set", "range", "enumerate", "zip",
    "map", "filter", "len", "count", "sorted", "sum", "min", "max", "first", "last", "abs",
    "round", "upper", "lower", "capitalize", "title", "strip", "replace", "split", "join",
    "json_encode", "json_decode", "is_list", "is_dict", "is_string", "is_number", "isset",
    "default",
];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

fn arity_error(name: &str) -> TemplateError {
    TemplateError::syntax(format!("wrong number of arguments to {name}()"))
}

fn kwarg<'a>(kwargs: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

pub fn call(name: &str, args: &[Value], kwargs: &[(String, Value)], ctx: &Context) -> Result<Value> {
    match name {
        "str" => Ok(Value::String(one(args, name)?.to_display_string())),
        "int" => to_int(one(args, name)?),
        "float" => to_float(one(args, name)?),
        "bool" => Ok(Value::Bool(one(args, name)?.is_truthy())),
        "list" => Ok(Value::list(to_iterable(one(args, name)?)?)),
        "tuple" => Ok(Value::list(to_iterable(one(args, name)?)?)),
        "set" => {
            let mut out: Vec<Value> = Vec::new();
            for v in to_iterable(one(args, name)?)? {
                if !out.iter().any(|x| x.equals(&v)) {
                    out.push(v);
                }
            }
            Ok(Value::list(out))
        }
        "dict" => match args.first() {
            None => Ok(Value::map(Vec::<(String, Value)>::new())),
            Some(Value::Map(m)) => Ok(Value::Map(Rc::new(RefCell::new(m.borrow().clone())))),
            Some(other) => Err(TemplateError::syntax(format!(
                "cannot build dict from '{}'",
                other.type_name()
            ))),
        },
        "range" => range(args),
        "enumerate" => {
            let items = to_iterable(one(args, name)?)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::list([Value::Int(i as i64), v])),
            ))
        }
        "zip" => {
            let lists: Vec<Vec<Value>> = args.iter().map(to_iterable).collect::<Result<_>>()?;
            let len = lists.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(Value::list(lists.iter().map(|l| l[i].clone())));
            }
            Ok(Value::list(out))
        }
        "map" => {
            let (f, iterable) = callable_and_iterable(args, name)?;
            let mut out = Vec::new();
            for item in iterable {
                out.push(f(&[item], ctx)?);
            }
            Ok(Value::list(out))
        }
        "filter" => {
            let (f, iterable) = callable_and_iterable(args, name)?;
            let mut out = Vec::new();
            for item in iterable {
                if f(&[item.clone()], ctx)?.is_truthy() {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "len" | "count" => {
            let v = one(args, name)?;
            v.len()
                .map(|n| Value::Int(n as i64))
                .ok_or_else(|| TemplateError::syntax(format!("object of type '{}' has no len()", v.type_name())))
        }
        "sorted" => {
            let mut items = to_iterable(one(args, name)?)?;
            let reverse = kwarg(kwargs, "reverse").is_some_and(Value::is_truthy);
            items.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        "sum" => {
            let items = to_iterable(one(args, name)?)?;
            let mut acc = Value::Int(0);
            for item in items {
                acc = crate::evaluator::eval::binop(crate::evaluator::ast::BinOp::Add, &acc, &item)?;
            }
            Ok(acc)
        }
        "min" | "max" => {
            let items = to_iterable(one(args, name)?)?;
            let mut iter = items.into_iter();
            let Some(mut best) = iter.next() else {
                return Err(TemplateError::syntax(format!("{name}() arg is an empty sequence")));
            };
            for item in iter {
                let ord = item.partial_cmp(&best).ok_or_else(|| {
                    TemplateError::syntax("values are not orderable".to_string())
                })?;
                if (name == "min" && ord.is_lt()) || (name == "max" && ord.is_gt()) {
                    best = item;
                }
            }
            Ok(best)
        }
        "first" | "last" => {
            let items = to_iterable(one(args, name)?)?;
            let found = if name == "first" { items.first() } else { items.last() };
            match found {
                Some(v) => Ok(v.clone()),
                None => Ok(kwarg(kwargs, "default").cloned().unwrap_or(Value::Null)),
            }
        }
        "abs" => match one(args, name)? {
            Value::Int(n) => Ok(Value::Int(n.abs())),
            Value::Float(n) => Ok(Value::Float(n.abs())),
            other => Err(TemplateError::syntax(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        "round" => {
            let n = one(args, name)?.as_float().ok_or_else(|| arity_error(name))?;
            let ndigits = args.get(1).and_then(Value::as_int).unwrap_or(0);
            let factor = 10f64.powi(ndigits as i32);
            let rounded = (n * factor).round() / factor;
            if ndigits <= 0 {
                Ok(Value::Int(rounded as i64))
            } else {
                Ok(Value::Float(rounded))
            }
        }
        "upper" => Ok(Value::String(str_arg(args, name)?.to_uppercase())),
        "lower" => Ok(Value::String(str_arg(args, name)?.to_lowercase())),
        "capitalize" => {
            let s = str_arg(args, name)?;
            let mut chars = s.chars();
            Ok(Value::String(match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }))
        }
        "title" => Ok(Value::String(
            str_arg(args, name)?
                .split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "strip" => Ok(Value::String(str_arg(args, name)?.trim().to_string())),
        "replace" => {
            if args.len() != 3 {
                return Err(arity_error(name));
            }
            let s = args[0].as_str().ok_or_else(|| arity_error(name))?;
            let old = args[1].as_str().ok_or_else(|| arity_error(name))?;
            let new = args[2].as_str().ok_or_else(|| arity_error(name))?;
            Ok(Value::String(s.replace(old, new)))
        }
        "split" => {
            let s = str_arg(args, name)?;
            let parts: Vec<Value> = match args.get(1).and_then(Value::as_str) {
                Some(sep) => s.split(sep).map(|p| Value::String(p.to_string())).collect(),
                None => s.split_whitespace().map(|p| Value::String(p.to_string())).collect(),
            };
            Ok(Value::list(parts))
        }
        "join" => {
            let items = to_iterable(args.first().ok_or_else(|| arity_error(name))?)?;
            let sep = args.get(1).and_then(Value::as_str).unwrap_or("");
            Ok(Value::String(
                items.iter().map(Value::to_display_string).collect::<Vec<_>>().join(sep),
            ))
        }
        "json_encode" => Ok(Value::String(
            serde_json::to_string(&value_to_json(one(args, name)?))
                .map_err(|e| TemplateError::syntax(format!("json_encode failed: {e}")))?,
        )),
        "json_decode" => {
            let s = str_arg(args, name)?;
            let json: Json = serde_json::from_str(&s)
                .map_err(|e| TemplateError::syntax(format!("json_decode failed: {e}")))?;
            Ok(json_to_value(&json))
        }
        "is_list" => Ok(Value::Bool(matches!(one(args, name)?, Value::List(_)))),
        "is_dict" => Ok(Value::Bool(matches!(one(args, name)?, Value::Map(_)))),
        "is_string" => Ok(Value::Bool(matches!(one(args, name)?, Value::String(_) | Value::SafeString(_)))),
        "is_number" => Ok(Value::Bool(matches!(one(args, name)?, Value::Int(_) | Value::Float(_)))),
        other => Err(TemplateError::syntax(format!("unknown builtin '{other}'"))),
    }
}

fn one<'a>(args: &'a [Value], name: &str) -> Result<&'a Value> {
    args.first().ok_or_else(|| arity_error(name))
}

fn str_arg(args: &[Value], name: &str) -> Result<String> {
    Ok(one(args, name)?.to_display_string())
}

fn to_int(v: &Value) -> Result<Value> {
    match v {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(*n as i64)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::String(s) | Value::SafeString(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| TemplateError::syntax(format!("invalid literal for int(): '{s}'"))),
        other => Err(TemplateError::syntax(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(v: &Value) -> Result<Value> {
    match v {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::String(s) | Value::SafeString(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| TemplateError::syntax(format!("could not convert string to float: '{s}'"))),
        other => Err(TemplateError::syntax(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_iterable(v: &Value) -> Result<Vec<Value>> {
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

fn callable_and_iterable<'a>(
    args: &'a [Value],
    name: &str,
) -> Result<(crate::value::CallableFn, Vec<Value>)> {
    if args.len() != 2 {
        return Err(arity_error(name));
    }
    let Value::Callable(f) = &args[0] else {
        return Err(TemplateError::syntax(format!("{name}() first argument must be callable")));
    };
    Ok((f.clone(), to_iterable(&args[1])?))
}

fn range(args: &[Value]) -> Result<Value> {
    let ints: Vec<i64> = args
        .iter()
        .map(|v| v.as_int().ok_or_else(|| TemplateError::syntax("range() arguments must be integers")))
        .collect::<Result<_>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(arity_error("range")),
    };
    if step == 0 {
        return Err(TemplateError::syntax("range() arg 3 must not be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            out.push(Value::Int(i));
            i += step;
        }
    } else {
        while i > stop {
            out.push(Value::Int(i));
            i += step;
        }
    }
    Ok(Value::list(out))
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number((*n).into()),
        Value::Float(n) => serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) | Value::SafeString(s) => Json::String(s.clone()),
        Value::List(l) => Json::Array(l.borrow().iter().map(value_to_json).collect()),
        Value::Map(m) => Json::Object(
            m.borrow()
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Host(h) => Json::String(h.to_display()),
        Value::Callable(_) => Json::Null,
    }
}

fn json_to_value(j: &Json) -> Value {
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::list(items.iter().map(json_to_value)),
        Json::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), json_to_value(v));
            }
            Value::Map(Rc::new(RefCell::new(out)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_reports_collection_size() {
        let ctx = Context::new();
        let v = call("len", &[Value::list([Value::Int(1), Value::Int(2)])], &[], &ctx).unwrap();
        assert_eq!(v.as_int(), Some(2));
    }

    #[test]
    fn first_uses_default_kwarg_when_empty() {
        let ctx = Context::new();
        let v = call(
            "first",
            &[Value::list([])],
            &[("default".to_string(), Value::Int(1))],
            &ctx,
        )
        .unwrap();
        assert_eq!(v.as_int(), Some(1));
    }

    #[test]
    fn json_round_trips_a_map() {
        let ctx = Context::new();
        let encoded = call("json_encode", &[Value::map([("a".to_string(), Value::Int(1))])], &[], &ctx)
            .unwrap();
        let decoded = call("json_decode", &[encoded], &[], &ctx).unwrap();
        assert_eq!(decoded.get_attr("a").as_int(), Some(1));
    }

    #[test]
    fn range_with_negative_step() {
        let ctx = Context::new();
        let v = call("range", &[Value::Int(5), Value::Int(0), Value::Int(-2)], &[], &ctx).unwrap();
        assert_eq!(v.len(), Some(3));
    }
}
