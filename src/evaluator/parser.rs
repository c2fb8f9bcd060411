//! Recursive-descent / precedence-climbing parser over the `Tok` stream
//! (expression mode) and, for `@python` blocks, a small line-oriented
//! statement parser (statement mode). Grounded on the shape of the
//! teacher's `parser::{core,precedence,expressions}` split, but the two
//! modes share one file here since the statement grammar is thin: a
//! handful of productions layered on top of the same expression parser.

use super::ast::{BinOp, BoolOp, CmpOp, Expr, Literal, Stmt, Target, UnaryOp};
use super::lexer::{self, Tok};
use crate::error::{Result, TemplateError};

/// Parse a single expression from a token stream (trailing `Eof` required,
/// nothing may follow the expression).
pub fn parse_expression(tokens: &[Tok]) -> Result<Expr> {
    let mut p = Parser { toks: tokens, pos: 0 };
    let expr = p.ternary()?;
    p.skip_newlines();
    p.expect(&Tok::Eof, "unexpected trailing input in expression")?;
    Ok(expr)
}

/// Parse a `@python` block body into a list of statements. Operates line by
/// line (rather than over a single flat token stream) so indentation can be
/// used to delimit blocks the way the host language does.
pub fn parse_program(src: &str) -> Result<Vec<Stmt>> {
    let lines = logical_lines(src)?;
    let mut pos = 0;
    let stmts = parse_block(&lines, &mut pos, lines.first().map(|l| l.indent).unwrap_or(0))?;
    Ok(stmts)
}

struct Line {
    indent: usize,
    text: String,
}

/// Split `src` into non-blank, non-comment-only lines with their raw
/// leading-whitespace width (spec.md §9 Open Question (c): width is a plain
/// character count, mixed tabs/spaces are not reconciled).
fn logical_lines(src: &str) -> Result<Vec<Line>> {
    let mut out = Vec::new();
    for raw in src.lines() {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = raw.len() - trimmed.len();
        out.push(Line {
            indent,
            text: trimmed.trim_end().to_string(),
        });
    }
    Ok(out)
}

/// Consume all lines at exactly `indent` as a single block; a line with
/// greater indent must be the body of the immediately preceding compound
/// statement and is consumed by that statement's own parsing, not here.
fn parse_block(lines: &[Line], pos: &mut usize, indent: usize) -> Result<Vec<Stmt>> {
    let mut out = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(TemplateError::syntax(format!(
                "unexpected indent in @python block: '{}'",
                line.text
            )));
        }
        out.push(parse_statement(lines, pos)?);
    }
    Ok(out)
}

fn parse_statement(lines: &[Line], pos: &mut usize) -> Result<Stmt> {
    let line = &lines[*pos];
    let indent = line.indent;
    let text = line.text.clone();

    if let Some(rest) = text.strip_prefix("if ").or_else(|| text.strip_prefix("if(")) {
        let rest = if text.starts_with("if(") { &text[2..] } else { rest };
        let header = strip_trailing_colon(rest, "if")?;
        *pos += 1;
        let body = parse_sub_block(lines, pos, indent)?;
        let mut branches = vec![(parse_expr_str(header)?, body)];
        let mut orelse = Vec::new();
        loop {
            if *pos >= lines.len() || lines[*pos].indent != indent {
                break;
            }
            let next = lines[*pos].text.clone();
            if let Some(rest) = next.strip_prefix("elif ") {
                let header = strip_trailing_colon(rest, "elif")?;
                *pos += 1;
                let body = parse_sub_block(lines, pos, indent)?;
                branches.push((parse_expr_str(header)?, body));
            } else if next.trim() == "else:" {
                *pos += 1;
                orelse = parse_sub_block(lines, pos, indent)?;
                break;
            } else {
                break;
            }
        }
        return Ok(Stmt::If { branches, orelse });
    }

    if let Some(rest) = text.strip_prefix("for ") {
        let (var, iter_src) = split_for_header(rest)?;
        *pos += 1;
        let body = parse_sub_block(lines, pos, indent)?;
        return Ok(Stmt::For {
            var,
            iter: parse_expr_str(&iter_src)?,
            body,
        });
    }

    if let Some(rest) = text.strip_prefix("while ") {
        let header = strip_trailing_colon(rest, "while")?;
        *pos += 1;
        let body = parse_sub_block(lines, pos, indent)?;
        return Ok(Stmt::While {
            test: parse_expr_str(header)?,
            body,
        });
    }

    *pos += 1;
    match text.as_str() {
        "break" => Ok(Stmt::Break),
        "continue" => Ok(Stmt::Continue),
        "pass" => Ok(Stmt::Pass),
        _ => parse_simple_statement(&text),
    }
}

fn parse_sub_block(lines: &[Line], pos: &mut usize, parent_indent: usize) -> Result<Vec<Stmt>> {
    let Some(line) = lines.get(*pos) else {
        return Err(TemplateError::syntax("expected an indented block"));
    };
    if line.indent <= parent_indent {
        return Err(TemplateError::syntax("expected an indented block"));
    }
    parse_block(lines, pos, line.indent)
}

fn strip_trailing_colon<'a>(s: &'a str, keyword: &str) -> Result<&'a str> {
    s.trim()
        .strip_suffix(':')
        .ok_or_else(|| TemplateError::syntax(format!("'{keyword}' header must end with ':'")))
}

fn split_for_header(rest: &str) -> Result<(String, String)> {
    let body = strip_trailing_colon(rest, "for")?;
    let (var, iter) = body
        .split_once(" in ")
        .ok_or_else(|| TemplateError::syntax("'for' header must contain 'in'"))?;
    Ok((var.trim().to_string(), iter.trim().to_string()))
}

/// Assignment / augmented-assignment / bare expression statement.
fn parse_simple_statement(text: &str) -> Result<Stmt> {
    let tokens = lexer::tokenize(text)?;
    let mut p = Parser { toks: &tokens, pos: 0 };

    for (op_tok, binop) in [
        (Tok::PlusEq, BinOp::Add),
        (Tok::MinusEq, BinOp::Sub),
        (Tok::StarEq, BinOp::Mul),
        (Tok::SlashEq, BinOp::Div),
        (Tok::SlashSlashEq, BinOp::FloorDiv),
        (Tok::PercentEq, BinOp::Mod),
        (Tok::StarStarEq, BinOp::Pow),
    ] {
        if let Some(idx) = find_top_level(&tokens, &op_tok) {
            let target = parse_target(&tokens[..idx])?;
            let mut rhs = Parser { toks: &tokens[idx + 1..], pos: 0 };
            let expr = rhs.ternary()?;
            return Ok(Stmt::AugAssign(target, binop, expr));
        }
    }
    if let Some(idx) = find_top_level(&tokens, &Tok::Assign) {
        let target = parse_target(&tokens[..idx])?;
        let mut rhs = Parser { toks: &tokens[idx + 1..], pos: 0 };
        let expr = rhs.ternary()?;
        return Ok(Stmt::Assign(target, expr));
    }
    let expr = p.ternary()?;
    Ok(Stmt::Expr(expr))
}

/// Index of the first occurrence of `tok` not nested inside brackets/parens.
fn find_top_level(tokens: &[Tok], tok: &Tok) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match t {
            Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => depth -= 1,
            _ if depth == 0 && t == tok => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_target(tokens: &[Tok]) -> Result<Target> {
    let mut p = Parser { toks: tokens, pos: 0 };
    let expr = p.postfix()?;
    p.skip_newlines();
    p.expect(&Tok::Eof, "unexpected trailing input in assignment target")?;
    match expr {
        Expr::Name(n) => Ok(Target::Name(n)),
        Expr::Attr(base, name) => Ok(Target::Attr(base, name)),
        Expr::Index(base, idx) => Ok(Target::Index(base, idx)),
        _ => Err(TemplateError::syntax("invalid assignment target")),
    }
}

fn parse_expr_str(src: &str) -> Result<Expr> {
    let tokens = lexer::tokenize(src)?;
    parse_expression(&tokens)
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        self.toks.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.toks.get(self.pos + offset).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks.get(self.pos).cloned().unwrap_or(Tok::Eof);
        self.pos += 1;
        t
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, tok: &Tok, msg: &str) -> Result<()> {
        if self.peek() == tok {
            self.pos += 1;
            Ok(())
        } else {
            Err(TemplateError::syntax(format!("{msg}: found {:?}", self.peek())))
        }
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(w) => Ok(w),
            other => Err(TemplateError::syntax(format!("expected identifier, found {other:?}"))),
        }
    }

    /// `a if b else c`
    fn ternary(&mut self) -> Result<Expr> {
        let body = self.or_expr()?;
        if self.eat_ident("if") {
            let test = self.or_expr()?;
            if !self.eat_ident("else") {
                return Err(TemplateError::syntax("expected 'else' in conditional expression"));
            }
            let orelse = self.ternary()?;
            return Ok(Expr::Ternary {
                body: Box::new(body),
                test: Box::new(test),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.and_expr()?];
        while self.eat_ident("or") {
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Expr::BoolOp(BoolOp::Or, terms)
        })
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.not_expr()?];
        while self.eat_ident("and") {
            terms.push(self.not_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Expr::BoolOp(BoolOp::And, terms)
        })
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_ident("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Eq2 => Some(CmpOp::Eq),
                Tok::NotEq => Some(CmpOp::Ne),
                Tok::Lt => Some(CmpOp::Lt),
                Tok::Le => Some(CmpOp::Le),
                Tok::Gt => Some(CmpOp::Gt),
                Tok::Ge => Some(CmpOp::Ge),
                Tok::Ident(w) if w == "in" => Some(CmpOp::In),
                Tok::Ident(w) if w == "not" && matches!(self.peek_at(1), Tok::Ident(w2) if w2 == "in") => {
                    Some(CmpOp::NotIn)
                }
                Tok::Ident(w) if w == "is" => Some(CmpOp::Is),
                _ => None,
            };
            let Some(op) = op else { break };
            match op {
                CmpOp::NotIn => {
                    self.pos += 2;
                }
                CmpOp::Is => {
                    self.pos += 1;
                    if self.eat_ident("not") {
                        let rhs = self.additive()?;
                        rest.push((CmpOp::IsNot, rhs));
                        continue;
                    }
                }
                _ => {
                    self.pos += 1;
                }
            }
            let rhs = self.additive()?;
            rest.push((op, rhs));
        }
        Ok(if rest.is_empty() {
            left
        } else {
            Expr::Compare(Box::new(left), rest)
        })
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::SlashSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Tok::Plus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?)))
            }
            Tok::Minus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.power(),
        }
    }

    /// Right-associative; `-2 ** 2` binds as `-(2 ** 2)` since `unary` calls
    /// `power`, not the other way around.
    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;
        if matches!(self.peek(), Tok::StarStar) {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Tok::LBracket => {
                    self.pos += 1;
                    expr = self.subscript(expr)?;
                    self.expect(&Tok::RBracket, "expected ']'")?;
                }
                Tok::LParen => {
                    self.pos += 1;
                    let (args, kwargs) = self.call_args()?;
                    self.expect(&Tok::RParen, "expected ')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn subscript(&mut self, base: Expr) -> Result<Expr> {
        if matches!(self.peek(), Tok::RBracket) {
            return Err(TemplateError::syntax("empty subscript"));
        }
        let start = if matches!(self.peek(), Tok::Colon) {
            None
        } else {
            Some(Box::new(self.ternary()?))
        };
        if !matches!(self.peek(), Tok::Colon) {
            let Some(idx) = start else {
                return Err(TemplateError::syntax("empty subscript"));
            };
            return Ok(Expr::Index(Box::new(base), idx));
        }
        self.pos += 1;
        let stop = if matches!(self.peek(), Tok::Colon | Tok::RBracket) {
            None
        } else {
            Some(Box::new(self.ternary()?))
        };
        let step = if matches!(self.peek(), Tok::Colon) {
            self.pos += 1;
            if matches!(self.peek(), Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.ternary()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice(Box::new(base), start, stop, step))
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if matches!(self.peek(), Tok::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            if let Tok::Ident(name) = self.peek().clone() {
                if matches!(self.peek_at(1), Tok::Assign) {
                    self.pos += 2;
                    let value = self.ternary()?;
                    kwargs.push((name, value));
                    if matches!(self.peek(), Tok::Comma) {
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
            }
            args.push(self.ternary()?);
            if matches!(self.peek(), Tok::Comma) {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok((args, kwargs))
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Tok::Int(n) => Ok(Expr::Literal(Literal::Int(n))),
            Tok::Float(n) => Ok(Expr::Literal(Literal::Float(n))),
            Tok::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Tok::Ident(w) => match w.as_str() {
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "None" => Ok(Expr::Literal(Literal::Null)),
                _ => Ok(Expr::Name(w)),
            },
            Tok::LParen => {
                if matches!(self.peek(), Tok::RParen) {
                    self.pos += 1;
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.ternary()?;
                if matches!(self.peek(), Tok::Comma) {
                    let mut items = vec![first];
                    while matches!(self.peek(), Tok::Comma) {
                        self.pos += 1;
                        if matches!(self.peek(), Tok::RParen) {
                            break;
                        }
                        items.push(self.ternary()?);
                    }
                    self.expect(&Tok::RParen, "expected ')'")?;
                    return Ok(Expr::Tuple(items));
                }
                self.expect(&Tok::RParen, "expected ')'")?;
                Ok(first)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Tok::RBracket) {
                    loop {
                        items.push(self.ternary()?);
                        if matches!(self.peek(), Tok::Comma) {
                            self.pos += 1;
                            if matches!(self.peek(), Tok::RBracket) {
                                break;
                            }
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Tok::RBracket, "expected ']'")?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                if matches!(self.peek(), Tok::RBrace) {
                    self.pos += 1;
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first_key = self.ternary()?;
                if matches!(self.peek(), Tok::Colon) {
                    self.pos += 1;
                    let first_val = self.ternary()?;
                    let mut pairs = vec![(first_key, first_val)];
                    while matches!(self.peek(), Tok::Comma) {
                        self.pos += 1;
                        if matches!(self.peek(), Tok::RBrace) {
                            break;
                        }
                        let k = self.ternary()?;
                        self.expect(&Tok::Colon, "expected ':' in dict literal")?;
                        let v = self.ternary()?;
                        pairs.push((k, v));
                    }
                    self.expect(&Tok::RBrace, "expected '}'")?;
                    Ok(Expr::Dict(pairs))
                } else {
                    let mut items = vec![first_key];
                    while matches!(self.peek(), Tok::Comma) {
                        self.pos += 1;
                        if matches!(self.peek(), Tok::RBrace) {
                            break;
                        }
                        items.push(self.ternary()?);
                    }
                    self.expect(&Tok::RBrace, "expected '}'")?;
                    Ok(Expr::Set(items))
                }
            }
            other => Err(TemplateError::syntax(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Expr {
        let tokens = lexer::tokenize(src).unwrap();
        parse_expression(&tokens).unwrap()
    }

    #[test]
    fn precedence_matches_python() {
        let e = parse("1 + 2 * 3");
        assert_eq!(
            e,
            Expr::BinOp(
                Box::new(Expr::Literal(Literal::Int(1))),
                BinOp::Add,
                Box::new(Expr::BinOp(
                    Box::new(Expr::Literal(Literal::Int(2))),
                    BinOp::Mul,
                    Box::new(Expr::Literal(Literal::Int(3)))
                ))
            )
        );
    }

    #[test]
    fn ternary_parses_body_test_orelse() {
        let e = parse("'yes' if flag else 'no'");
        match e {
            Expr::Ternary { body, test, orelse } => {
                assert_eq!(*body, Expr::Literal(Literal::Str("yes".into())));
                assert_eq!(*test, Expr::Name("flag".into()));
                assert_eq!(*orelse, Expr::Literal(Literal::Str("no".into())));
            }
            other => panic!("expected ternary, got {other:?}"),
        }
    }

    #[test]
    fn chained_comparison_collects_all_operators() {
        let e = parse("1 < x <= 10");
        match e {
            Expr::Compare(_, rest) => assert_eq!(rest.len(), 2),
            other => panic!("expected compare, got {other:?}"),
        }
    }

    #[test]
    fn not_in_and_is_not_are_recognised() {
        assert!(matches!(
            parse("x not in items"),
            Expr::Compare(_, rest) if rest[0].0 == CmpOp::NotIn
        ));
        assert!(matches!(
            parse("x is not None"),
            Expr::Compare(_, rest) if rest[0].0 == CmpOp::IsNot
        ));
    }

    #[test]
    fn call_with_positional_and_keyword_args() {
        let e = parse("first(items, default=1)");
        match e {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs, vec![("default".to_string(), Expr::Literal(Literal::Int(1)))]);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn slice_with_step_parses() {
        let e = parse("items[1:10:2]");
        assert!(matches!(e, Expr::Slice(_, Some(_), Some(_), Some(_))));
    }

    #[test]
    fn python_block_parses_if_for_and_assignment() {
        let src = "total = 0\nfor item in items:\n    if item > 0:\n        total += item\n    else:\n        continue\n";
        let stmts = parse_program(src).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0], Stmt::Assign(Target::Name(_), _)));
        assert!(matches!(stmts[1], Stmt::For { .. }));
    }
}
