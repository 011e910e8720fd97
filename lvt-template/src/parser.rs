//! Recursive-descent parser turning a token stream into an [`Ast`].
//!
//! Grammar (informal): a template is a sequence of text runs and
//! directives. `if`/`with`/`range` open a block that must be closed by a
//! matching `end`, with an optional `else` in between. `template "name"` is
//! a composition invocation, resolved later by [`crate::compose`]. Anything
//! else is a bare expression pipeline.

use crate::ast::{Ast, Expr, PipeStage};
use crate::error::TemplateParseError;
use crate::tokenizer::{tokenize, Token};
use crate::value::Value;

const KEYWORDS: &[&str] = &["if", "with", "range", "template", "else", "end"];

pub fn parse(source: &str) -> Result<Ast, TemplateParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let nodes = parser.parse_until(&[])?;
    Ok(Ast::list(nodes))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Parses text and directives until a directive keyword in
    /// `stop_words` is seen (left unconsumed) or input runs out (only a
    /// clean end when `stop_words` is empty, i.e. the top level).
    fn parse_until(&mut self, stop_words: &[&str]) -> Result<Vec<Ast>, TemplateParseError> {
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                None => return Ok(nodes),
                Some(Token::Text(text)) => {
                    nodes.push(Ast::Text(text.clone()));
                    self.pos += 1;
                }
                Some(Token::Directive { body, offset }) => {
                    let body = body.clone();
                    let offset = *offset;
                    let (keyword, rest) = split_keyword(&body);
                    if stop_words.contains(&keyword) {
                        return Ok(nodes);
                    }
                    self.pos += 1;
                    match keyword {
                        "if" => nodes.push(self.parse_if(rest, offset)?),
                        "with" => nodes.push(self.parse_with(rest, offset)?),
                        "range" => nodes.push(self.parse_range(rest, offset)?),
                        "template" => nodes.push(parse_template(rest, offset)?),
                        "else" | "end" => {
                            return Err(TemplateParseError::UnmatchedEnd { offset });
                        }
                        _ => {
                            let expr = parse_expr(&body)
                                .map_err(|reason| bad_expr(&body, reason))?;
                            nodes.push(Ast::Action(expr));
                        }
                    }
                }
            }
        }
    }

    fn parse_if(&mut self, rest: &str, offset: usize) -> Result<Ast, TemplateParseError> {
        if rest.is_empty() {
            return Err(TemplateParseError::MissingArgument { keyword: "if", offset });
        }
        let cond = parse_expr(rest).map_err(|reason| bad_expr(rest, reason))?;
        let then_branch = Box::new(Ast::list(self.parse_until(&["else", "end"])?));
        let else_branch = self.parse_else_or_end(offset, "if")?;
        Ok(Ast::If { cond, then_branch, else_branch })
    }

    fn parse_with(&mut self, rest: &str, offset: usize) -> Result<Ast, TemplateParseError> {
        if rest.is_empty() {
            return Err(TemplateParseError::MissingArgument { keyword: "with", offset });
        }
        let scope = parse_expr(rest).map_err(|reason| bad_expr(rest, reason))?;
        let body = Box::new(Ast::list(self.parse_until(&["else", "end"])?));
        let else_branch = self.parse_else_or_end(offset, "with")?;
        Ok(Ast::With { scope, body, else_branch })
    }

    fn parse_range(&mut self, rest: &str, offset: usize) -> Result<Ast, TemplateParseError> {
        if rest.is_empty() {
            return Err(TemplateParseError::MissingArgument { keyword: "range", offset });
        }
        let (index_var, value_var, collection_src) = parse_range_header(rest);
        let collection =
            parse_expr(&collection_src).map_err(|reason| bad_expr(&collection_src, reason))?;
        let body = Box::new(Ast::list(self.parse_until(&["else", "end"])?));
        let else_branch = self.parse_else_or_end(offset, "range")?;
        Ok(Ast::Range { collection, index_var, value_var, body, else_branch })
    }

    fn parse_else_or_end(
        &mut self,
        open_offset: usize,
        kind: &'static str,
    ) -> Result<Option<Box<Ast>>, TemplateParseError> {
        match self.peek() {
            Some(Token::Directive { body, .. }) => {
                let (keyword, _) = split_keyword(body);
                match keyword {
                    "else" => {
                        self.pos += 1;
                        let else_nodes = self.parse_until(&["end"])?;
                        self.expect_end(open_offset, kind)?;
                        Ok(Some(Box::new(Ast::list(else_nodes))))
                    }
                    "end" => {
                        self.pos += 1;
                        Ok(None)
                    }
                    _ => Err(TemplateParseError::UnterminatedBlock { kind, offset: open_offset }),
                }
            }
            _ => Err(TemplateParseError::UnterminatedBlock { kind, offset: open_offset }),
        }
    }

    fn expect_end(&mut self, open_offset: usize, kind: &'static str) -> Result<(), TemplateParseError> {
        match self.peek() {
            Some(Token::Directive { body, .. }) if split_keyword(body).0 == "end" => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(TemplateParseError::UnterminatedBlock { kind, offset: open_offset }),
        }
    }
}

fn bad_expr(source: &str, reason: String) -> TemplateParseError {
    TemplateParseError::BadExpression { source: source.to_string(), reason }
}

fn parse_template(rest: &str, offset: usize) -> Result<Ast, TemplateParseError> {
    let name = parse_quoted(rest).ok_or(TemplateParseError::MissingArgument {
        keyword: "template",
        offset,
    })?;
    Ok(Ast::Include(name))
}

fn parse_quoted(s: &str) -> Option<String> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

/// Splits a directive body into its leading keyword (if it's one of
/// [`KEYWORDS`]) and the remainder, or `("", body)` when the body is a bare
/// expression.
fn split_keyword(body: &str) -> (&str, &str) {
    let (first, rest) = match body.split_once(char::is_whitespace) {
        Some((f, r)) => (f, r.trim_start()),
        None => (body, ""),
    };
    if KEYWORDS.contains(&first) {
        (first, rest)
    } else {
        ("", body)
    }
}

/// `$i, $v := .Items` / `$v := .Items` / `.Items` -> (index var, value var, collection source).
fn parse_range_header(rest: &str) -> (Option<String>, Option<String>, String) {
    match rest.find(":=") {
        Some(idx) => {
            let vars_part = rest[..idx].trim();
            let expr_part = rest[idx + 2..].trim().to_string();
            let names: Vec<String> = vars_part
                .split(',')
                .map(|s| s.trim().trim_start_matches('$').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            match names.len() {
                1 => (None, Some(names[0].clone()), expr_part),
                2 => (Some(names[0].clone()), Some(names[1].clone()), expr_part),
                _ => (None, None, expr_part),
            }
        }
        None => (None, None, rest.trim().to_string()),
    }
}

/// Parses a pipeline: `operand ('|' func arg*)*`.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let stages = split_top_level(src, '|');
    let mut stages = stages.into_iter();
    let head = stages.next().ok_or_else(|| "empty expression".to_string())?;
    let operand = parse_operand(head.trim())?;

    let mut pipe_stages = Vec::new();
    for stage_src in stages {
        let words = split_top_level(stage_src.trim(), ' ');
        let mut words = words.into_iter().filter(|w| !w.is_empty());
        let func = words.next().ok_or_else(|| "empty pipe stage".to_string())?;
        let mut args = Vec::new();
        for word in words {
            args.push(parse_operand(&word)?);
        }
        pipe_stages.push(PipeStage { func, args });
    }

    if pipe_stages.is_empty() {
        Ok(operand)
    } else {
        Ok(Expr::Pipeline(Box::new(operand), pipe_stages))
    }
}

fn parse_operand(tok: &str) -> Result<Expr, String> {
    if tok.is_empty() {
        return Err("empty operand".to_string());
    }
    if tok.len() >= 2 && tok.starts_with('"') && tok.ends_with('"') {
        return Ok(Expr::Literal(Value::String(tok[1..tok.len() - 1].to_string())));
    }
    if tok == "true" {
        return Ok(Expr::Literal(Value::Bool(true)));
    }
    if tok == "false" {
        return Ok(Expr::Literal(Value::Bool(false)));
    }
    if let Ok(n) = tok.parse::<i64>() {
        return Ok(Expr::Literal(Value::Number(serde_json::Number::from(n))));
    }
    if let Ok(f) = tok.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Expr::Literal(Value::Number(n)));
        }
    }
    if let Some(rest) = tok.strip_prefix('$') {
        return Ok(parse_dollar(rest));
    }
    if let Some(rest) = tok.strip_prefix('.') {
        return Ok(Expr::Dot(split_path(rest)));
    }
    Err(format!("unrecognized operand `{tok}`"))
}

fn parse_dollar(rest: &str) -> Expr {
    if rest.is_empty() {
        return Expr::Root(Vec::new());
    }
    if let Some(path) = rest.strip_prefix('.') {
        return Expr::Root(split_path(path));
    }
    let mut parts = rest.splitn(2, '.');
    let name = parts.next().unwrap_or_default().to_string();
    let path = parts.next().map(split_path).unwrap_or_default();
    Expr::Var(name, path)
}

fn split_path(s: &str) -> Vec<String> {
    s.split('.').filter(|p| !p.is_empty()).map(str::to_string).collect()
}

/// Splits `s` on `sep` at top level only, ignoring separators inside
/// double-quoted strings.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c == sep && !in_quotes {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}
