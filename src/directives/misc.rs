//! `@python`, `@isset`, `@empty` (spec.md §4.8 "Misc"). Comment tokens
//! (`{{-- … --}}`) need no handling here: the tokenizer already recognises
//! them as a distinct, non-directive kind, and the final variable-
//! interpolation pass drops them from the output.

use crate::compiler::{find_matching_end, tokenize};
use crate::error::{Result, TemplateError};
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice};

fn process_python(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(i) = find_directive(&tokens, "python") else {
            break;
        };
        if !state.allow_python_blocks {
            return Err(TemplateError::security("@python blocks are disabled"));
        }
        let end = find_matching_end(&tokens, i, "python", "endpython")?;
        let body = &text[tokens[i].end..tokens[end].start];
        evaluator::eval_statements(body, ctx)?;
        text = splice(&text, tokens[i].start, tokens[end].end, "");
    }
    Ok(text)
}

fn process_isset_empty(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let found = tokens.iter().enumerate().find(|(_, t)| {
            t.kind == crate::compiler::TokenKind::Directive
                && (t.directive_name() == "isset" || t.directive_name() == "empty")
        });
        let Some((i, tok)) = found else {
            break;
        };
        let name = tok.directive_name().to_string();
        let args = tok.directive_args().to_string();
        let end = find_matching_end(&tokens, i, &name, &format!("end{name}"))?;
        let body = text[tokens[i].end..tokens[end].start].to_string();

        let defined = evaluator::is_defined(&args, ctx)?;
        let value_truthy = if defined {
            evaluator::eval_expression(&args, ctx)?.is_truthy()
        } else {
            false
        };
        let show = if name == "isset" { defined } else { !defined || !value_truthy };
        let replacement = if show {
            parser::control_structures_pass(&body, ctx, state)?
        } else {
            String::new()
        };
        text = splice(&text, tokens[i].start, tokens[end].end, &replacement);
    }
    Ok(text)
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let after_python = process_python(text, ctx, state)?;
    process_isset_empty(&after_python, ctx, state)
}
