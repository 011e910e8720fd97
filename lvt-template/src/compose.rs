//! Flattens `{{template "name"}}` invocations into a single AST before the
//! walker ever sees it, failing fast on cyclic inclusion via DFS with a
//! visited set.

use crate::ast::Ast;
use crate::error::CompositionError;
use indexmap::IndexMap;

/// A registry of named, parsed-but-not-yet-flattened templates.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Ast>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, ast: Ast) {
        self.templates.insert(name.into(), ast);
    }

    /// Resolves every `Include` in `name`'s template, recursively, into a
    /// single self-contained [`Ast`].
    pub fn flatten(&self, name: &str) -> Result<Ast, CompositionError> {
        let mut stack = Vec::new();
        self.flatten_inner(name, &mut stack)
    }

    fn flatten_inner(&self, name: &str, stack: &mut Vec<String>) -> Result<Ast, CompositionError> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = stack[pos..].to_vec();
            cycle.push(name.to_string());
            tracing::warn!(cycle = ?cycle, "cyclic template inclusion detected");
            return Err(CompositionError::Cycle(cycle));
        }
        let ast = self
            .templates
            .get(name)
            .ok_or_else(|| CompositionError::UnknownTemplate(name.to_string()))?;

        stack.push(name.to_string());
        let flattened = self.flatten_ast(ast, stack)?;
        stack.pop();
        Ok(flattened)
    }

    fn flatten_ast(&self, ast: &Ast, stack: &mut Vec<String>) -> Result<Ast, CompositionError> {
        let flat = match ast {
            Ast::Text(t) => Ast::Text(t.clone()),
            Ast::Action(e) => Ast::Action(e.clone()),
            Ast::If { cond, then_branch, else_branch } => Ast::If {
                cond: cond.clone(),
                then_branch: Box::new(self.flatten_ast(then_branch, stack)?),
                else_branch: else_branch
                    .as_ref()
                    .map(|b| self.flatten_ast(b, stack))
                    .transpose()?
                    .map(Box::new),
            },
            Ast::With { scope, body, else_branch } => Ast::With {
                scope: scope.clone(),
                body: Box::new(self.flatten_ast(body, stack)?),
                else_branch: else_branch
                    .as_ref()
                    .map(|b| self.flatten_ast(b, stack))
                    .transpose()?
                    .map(Box::new),
            },
            Ast::Range { collection, index_var, value_var, body, else_branch } => Ast::Range {
                collection: collection.clone(),
                index_var: index_var.clone(),
                value_var: value_var.clone(),
                body: Box::new(self.flatten_ast(body, stack)?),
                else_branch: else_branch
                    .as_ref()
                    .map(|b| self.flatten_ast(b, stack))
                    .transpose()?
                    .map(Box::new),
            },
            Ast::Include(name) => self.flatten_inner(name, stack)?,
            Ast::List(nodes) => Ast::List(
                nodes
                    .iter()
                    .map(|n| self.flatten_ast(n, stack))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn flattens_a_simple_include() {
        let mut reg = TemplateRegistry::new();
        reg.insert("child", parse("child-content").unwrap());
        reg.insert("root", parse(r#"before {{template "child"}} after"#).unwrap());

        let flat = reg.flatten("root").unwrap();
        assert_eq!(
            flat,
            Ast::List(vec![
                Ast::Text("before ".to_string()),
                Ast::Text("child-content".to_string()),
                Ast::Text(" after".to_string()),
            ])
        );
    }

    #[test]
    fn detects_cycles() {
        let mut reg = TemplateRegistry::new();
        reg.insert("a", parse(r#"{{template "b"}}"#).unwrap());
        reg.insert("b", parse(r#"{{template "a"}}"#).unwrap());

        let err = reg.flatten("a").unwrap_err();
        assert!(matches!(err, CompositionError::Cycle(_)));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let reg = TemplateRegistry::new();
        let err = reg.flatten("missing").unwrap_err();
        assert!(matches!(err, CompositionError::UnknownTemplate(_)));
    }
}
