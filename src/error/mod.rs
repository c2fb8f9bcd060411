//! The error taxonomy (spec.md §7): one enum variant family per phase, each
//! carrying an optional template name, line number, and a truncated source
//! snippet. Grounded on the teacher's per-phase `thiserror` enums
//! (`LexerError`/`ParserError`/`RuntimeError`/...), collapsed into the flat
//! set spec.md's error surface (§6) names.

use thiserror::Error;

/// Code/expression snippets in error context are truncated to this many
/// characters (spec.md §6).
const CODE_SNIPPET_MAX: usize = 100;
/// Template-source previews are truncated to this many characters.
const TEMPLATE_SNIPPET_MAX: usize = 50;

pub fn truncate_for_code(s: &str) -> String {
    truncate(s, CODE_SNIPPET_MAX)
}

pub fn truncate_for_template(s: &str) -> String {
    truncate(s, TEMPLATE_SNIPPET_MAX)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

/// A single error carried through the render pipeline.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {name}{}", at_line(*line))]
    NotFound {
        name: String,
        line: Option<u32>,
    },

    #[error("template syntax error: {message}{}", at_line(*line))]
    Syntax {
        message: String,
        template_name: Option<String>,
        line: Option<u32>,
        context: Option<String>,
    },

    #[error("directive error in @{directive}: {message}{}", at_line(*line))]
    Directive {
        directive: String,
        message: String,
        template_name: Option<String>,
        line: Option<u32>,
    },

    #[error("compilation error: {message}{}", at_line(*line))]
    Compilation {
        message: String,
        template_name: Option<String>,
        line: Option<u32>,
    },

    #[error("security error: {message}{}", at_line(*line))]
    Security {
        message: String,
        template_name: Option<String>,
        line: Option<u32>,
        context: Option<String>,
    },

    /// Missing name in `{{ }}` / `{!! !!}`. Only ever constructed by the
    /// variable-interpolation handler; in `strict_mode=false` it is
    /// swallowed at that call site rather than propagated (spec.md §7).
    #[error("undefined variable: {name}")]
    VariableLookup { name: String },
}

fn at_line(line: Option<u32>) -> String {
    match line {
        Some(l) => format!(" (line {l})"),
        None => String::new(),
    }
}

impl TemplateError {
    pub fn not_found(name: impl Into<String>) -> Self {
        TemplateError::NotFound {
            name: name.into(),
            line: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            template_name: None,
            line: None,
            context: None,
        }
    }

    pub fn syntax_at(message: impl Into<String>, line: u32) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            template_name: None,
            line: Some(line),
            context: None,
        }
    }

    pub fn directive(name: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::Directive {
            directive: name.into(),
            message: message.into(),
            template_name: None,
            line: None,
        }
    }

    pub fn compilation(message: impl Into<String>, line: Option<u32>) -> Self {
        TemplateError::Compilation {
            message: message.into(),
            template_name: None,
            line,
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        TemplateError::Security {
            message: message.into(),
            template_name: None,
            line: None,
            context: None,
        }
    }

    pub fn security_with_context(message: impl Into<String>, context: &str) -> Self {
        TemplateError::Security {
            message: message.into(),
            template_name: None,
            line: None,
            context: Some(truncate_for_code(context)),
        }
    }

    /// Attach the template name to any variant that carries one, returning
    /// `self` unchanged for variants that don't (NotFound already carries a
    /// name; VariableLookup never escapes far enough to need one).
    pub fn with_template_name(mut self, name: &str) -> Self {
        match &mut self {
            TemplateError::Syntax { template_name, .. }
            | TemplateError::Directive { template_name, .. }
            | TemplateError::Compilation { template_name, .. }
            | TemplateError::Security { template_name, .. } => {
                *template_name = Some(name.to_string());
            }
            _ => {}
        }
        self
    }

    /// Security errors are unconditionally propagated (spec.md §7); every
    /// other kind may be policy-swallowed by a caller that chooses to.
    pub fn is_security(&self) -> bool {
        matches!(self, TemplateError::Security { .. })
    }
}

/// Internal control-flow signal for `@break`/`@continue` (spec.md §9:
/// modeled as a tagged return value, never a host exception crossing a
/// pass boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Break,
    Continue,
}

pub type Result<T> = std::result::Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_bounds() {
        let long_code = "a".repeat(200);
        assert_eq!(truncate_for_code(&long_code).chars().count(), 103);
        let long_tpl = "b".repeat(200);
        assert_eq!(truncate_for_template(&long_tpl).chars().count(), 53);
    }

    #[test]
    fn security_errors_are_flagged() {
        let e = TemplateError::security("dunder access blocked");
        assert!(e.is_security());
        let e2 = TemplateError::not_found("x");
        assert!(!e2.is_security());
    }
}
