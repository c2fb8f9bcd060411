//! User-supplied directive handler table (spec.md §4.1 `register_directive`,
//! §4.10 "Custom directives"). Kept separate from the built-in directive
//! families so `Engine::register_directive` has one obvious place to write
//! to and `custom.rs` has one obvious place to read from.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Result, TemplateError};
use crate::value::{Context, Value};

/// An argument to a custom directive: the evaluator's best attempt at
/// expression mode, falling back to the literal source text on parse
/// failure (spec.md §4.10).
#[derive(Debug, Clone)]
pub enum DirectiveArg {
    Value(Value),
    Raw(String),
}

pub type DirectiveFn = Rc<dyn Fn(&[DirectiveArg], &Context) -> Result<Value>>;

#[derive(Default)]
pub struct Registry {
    handlers: std::cell::RefCell<IndexMap<String, DirectiveFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&self, name: &str, handler: DirectiveFn) -> Result<()> {
        validate_identifier(name)?;
        self.handlers.borrow_mut().insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DirectiveFn> {
        self.handlers.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.borrow().keys().cloned().collect()
    }
}

/// Shared by `register_directive` and `add_global`/`add_globals` (spec.md
/// §4.1: "names must be valid identifiers, not leading underscore").
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TemplateError::directive(name, "invalid identifier"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_leading_underscore_and_non_alnum() {
        assert!(validate_identifier("_hidden").is_err());
        assert!(validate_identifier("ok_name").is_ok());
        assert!(validate_identifier("bad-name").is_err());
    }
}
