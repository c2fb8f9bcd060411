//! Runtime values for the template context.
//!
//! Grounded on the teacher's `interpreter::value::Value` (tagged variant,
//! `Rc<RefCell<_>>` for shared mutable collections) but narrowed to the set
//! spec.md §3 enumerates, plus `SafeString` — the "already escaped" marker
//! that the HTML-escape step must treat as a no-op.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::TemplateError;

/// A host-supplied object exposing attribute and index lookup without the
/// engine knowing its concrete type (spec.md §3: "opaque host object").
pub trait HostObject: fmt::Debug {
    fn get_attr(&self, name: &str) -> Option<Value>;
    fn get_index(&self, index: &Value) -> Option<Value>;
    /// Stringified form used when the object is interpolated directly.
    fn to_display(&self) -> String;
}

/// A directive/evaluator-callable value: `(args, context) -> value`.
pub type CallableFn = Rc<dyn Fn(&[Value], &Context) -> Result<Value, TemplateError>>;

/// A context-mapping value: ordered `name -> Value`, dot-and-subscript
/// accessible (spec.md §3: "Context").
pub type Map = IndexMap<String, Value>;

/// A value flowing through the evaluator and the render pipeline.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A string that has already passed through (or is exempt from) HTML
    /// escaping. Escaping is a no-op on this variant (spec.md §3 invariant).
    SafeString(String),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Map>>),
    Host(Rc<dyn HostObject>),
    Callable(CallableFn),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::SafeString(s) => write!(f, "SafeString({s:?})"),
            Value::List(l) => write!(f, "List({:?})", l.borrow()),
            Value::Map(m) => write!(f, "Map({:?})", m.borrow().keys().collect::<Vec<_>>()),
            Value::Host(h) => write!(f, "Host({})", h.to_display()),
            Value::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

impl Value {
    pub fn map(pairs: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Map(Rc::new(RefCell::new(pairs.into_iter().collect())))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) | Value::SafeString(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Host(_) => "object",
            Value::Callable(_) => "callable",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by `@if`/`@switch`/loop conditions and boolean ops.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) | Value::SafeString(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Host(_) | Value::Callable(_) => true,
        }
    }

    /// String form used for `{{ }}`/`{!! !!}` interpolation and concatenation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{n:.1}")
                } else {
                    n.to_string()
                }
            }
            Value::String(s) | Value::SafeString(s) => s.clone(),
            Value::List(l) => {
                let items: Vec<String> =
                    l.borrow().iter().map(Value::to_display_string).collect();
                items.join(", ")
            }
            Value::Map(_) => "[object Map]".to_string(),
            Value::Host(h) => h.to_display(),
            Value::Callable(_) => "[object Callable]".to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::SafeString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::SafeString(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.borrow().len()),
            Value::Map(m) => Some(m.borrow().len()),
            _ => None,
        }
    }

    /// Dot-access (`m.k`) / subscript (`m["k"]`) resolution on maps, plus
    /// transparent recursion into nested maps and host objects
    /// (spec.md §3: "dot-access").
    pub fn get_attr(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.borrow().get(name).cloned().unwrap_or(Value::Null),
            Value::Host(h) => h.get_attr(name).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn get_index(&self, index: &Value) -> Value {
        match self {
            Value::Map(m) => {
                if let Some(key) = index.as_str() {
                    return m.borrow().get(key).cloned().unwrap_or(Value::Null);
                }
                Value::Null
            }
            Value::List(l) => {
                let list = l.borrow();
                let Some(mut i) = index.as_int() else {
                    return Value::Null;
                };
                if i < 0 {
                    i += list.len() as i64;
                }
                if i >= 0 && (i as usize) < list.len() {
                    list[i as usize].clone()
                } else {
                    Value::Null
                }
            }
            Value::Host(h) => h.get_index(index).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Structural equality used by `==`/`!=`/`in`/`@case`.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a) | Value::SafeString(a), Value::String(b) | Value::SafeString(b)) => {
                a == b
            }
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            _ => false,
        }
    }

    pub fn partial_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::String(a) | Value::SafeString(a), Value::String(b) | Value::SafeString(b)) => {
                a.partial_cmp(b)
            }
            _ => self.as_float()?.partial_cmp(&other.as_float()?),
        }
    }
}

/// The per-render variable binding (spec.md §3: "Context").
///
/// A thin wrapper over `Value::Map` plus a chained parent frame, so loop
/// iterations can overlay one binding without deep-copying the enclosing
/// context (spec.md §9 "Per-iteration scope").
#[derive(Clone)]
pub struct Context {
    local: Rc<RefCell<Map>>,
    parent: Option<Rc<Context>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            local: Rc::new(RefCell::new(Map::new())),
            parent: None,
        }
    }

    pub fn from_map(map: Map) -> Self {
        Context {
            local: Rc::new(RefCell::new(map)),
            parent: None,
        }
    }

    /// Overlay a single binding on top of `self` (used by loops and
    /// component/include scopes). O(1): no copy of the parent frame.
    pub fn child_with(&self, name: &str, value: Value) -> Context {
        let mut map = Map::new();
        map.insert(name.to_string(), value);
        Context {
            local: Rc::new(RefCell::new(map)),
            parent: Some(Rc::new(self.clone())),
        }
    }

    /// Overlay several bindings at once (component contexts, `@includeIf`
    /// merged data).
    pub fn child_with_map(&self, overlay: Map) -> Context {
        Context {
            local: Rc::new(RefCell::new(overlay)),
            parent: Some(Rc::new(self.clone())),
        }
    }

    pub fn get(&self, name: &str) -> Value {
        if let Some(v) = self.local.borrow().get(name) {
            return v.clone();
        }
        if let Some(parent) = &self.parent {
            return parent.get(name);
        }
        Value::Null
    }

    pub fn contains(&self, name: &str) -> bool {
        if self.local.borrow().contains_key(name) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    pub fn set(&self, name: &str, value: Value) {
        self.local.borrow_mut().insert(name.to_string(), value);
    }

    /// Flatten into a single owned map, innermost bindings winning
    /// (used to build a fresh context for `@include`/components).
    pub fn to_flat_map(&self) -> Map {
        let mut out = Map::new();
        if let Some(parent) = &self.parent {
            out.extend(parent.to_flat_map());
        }
        out.extend(self.local.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec_examples() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::list([]).is_truthy() == false);
        assert!(Value::Bool(true).is_truthy());
    }

    #[test]
    fn safe_string_equals_plain_string() {
        let a = Value::String("x".into());
        let b = Value::SafeString("x".into());
        assert!(a.equals(&b));
    }

    #[test]
    fn context_child_overlay_does_not_mutate_parent() {
        let root = Context::new();
        root.set("name", Value::String("root".into()));
        let child = root.child_with("name", Value::String("child".into()));
        assert_eq!(child.get("name").as_str(), Some("child"));
        assert_eq!(root.get("name").as_str(), Some("root"));
    }

    #[test]
    fn context_dot_access_on_nested_map() {
        let inner = Value::map([("city".to_string(), Value::String("NYC".into()))]);
        let outer = Context::new();
        outer.set("user", Value::map([("address".to_string(), inner)]));
        let addr = outer.get("user").get_attr("address");
        assert_eq!(addr.get_attr("city").as_str(), Some("NYC"));
    }
}
