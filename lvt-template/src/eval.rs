//! Expression evaluation: resolves [`Expr`] pipelines against a [`Context`]
//! to produce a [`Value`].

use crate::ast::{Expr, PipeStage};
use crate::error::EvaluationError;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

pub type PipeFn = fn(&[Value]) -> Result<Value, EvaluationError>;

/// The data-binding capability an expression evaluates against: the current
/// context (`.`), the root data (`$`), and any range-bound variables
/// (`$i`, `$v`, ...) visible at this point. A range body keeps access to
/// parent-scope variables, so `vars` accumulates rather than being
/// replaced on each nested scope.
#[derive(Clone)]
pub struct Context<'a> {
    root: &'a Value,
    dot: Value,
    vars: IndexMap<String, Value>,
}

impl<'a> Context<'a> {
    pub fn root(data: &'a Value) -> Self {
        Context { root: data, dot: data.clone(), vars: IndexMap::new() }
    }

    pub fn dot(&self) -> &Value {
        &self.dot
    }

    /// A child scope with a new `.` but the same `$` and bound variables.
    pub fn with_dot(&self, dot: Value) -> Self {
        Context { root: self.root, dot, vars: self.vars.clone() }
    }

    /// A child scope that additionally binds `$name`.
    pub fn with_var(&self, name: impl Into<String>, value: Value) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(name.into(), value);
        Context { root: self.root, dot: self.dot.clone(), vars }
    }

    fn resolve_path(base: &Value, path: &[String]) -> Result<Value, EvaluationError> {
        let mut current = base;
        for segment in path {
            current = current.field(segment).ok_or_else(|| EvaluationError::MissingField {
                field: segment.clone(),
                on: "map",
            })?;
        }
        Ok(current.clone())
    }
}

pub struct Evaluator {
    funcs: HashMap<String, PipeFn>,
}

impl Default for Evaluator {
    fn default() -> Self {
        let mut funcs: HashMap<String, PipeFn> = HashMap::new();
        funcs.insert("upper".to_string(), fn_upper);
        funcs.insert("lower".to_string(), fn_lower);
        funcs.insert("len".to_string(), fn_len);
        funcs.insert("default".to_string(), fn_default);
        Evaluator { funcs }
    }
}

impl Evaluator {
    pub fn with_func(mut self, name: impl Into<String>, func: PipeFn) -> Self {
        self.funcs.insert(name.into(), func);
        self
    }

    /// Top-level evaluation entry point. Establishes the one panic boundary
    /// the design notes call for (§9): downstream `eval_inner` calls never
    /// catch their own panics.
    pub fn eval(&self, expr: &Expr, ctx: &Context<'_>) -> Result<Value, EvaluationError> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.eval_inner(expr, ctx)));
        match result {
            Ok(value) => value,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::warn!(panic = %message, "evaluator panicked, recovered at the panic boundary");
                Err(EvaluationError::Panicked(message))
            }
        }
    }

    fn eval_inner(&self, expr: &Expr, ctx: &Context<'_>) -> Result<Value, EvaluationError> {
        match expr {
            Expr::Dot(path) => Context::resolve_path(ctx.dot(), path),
            Expr::Root(path) => Context::resolve_path(ctx.root, path),
            Expr::Var(name, path) => {
                let base = ctx
                    .vars
                    .get(name)
                    .ok_or_else(|| EvaluationError::UnboundVariable(name.clone()))?;
                Context::resolve_path(base, path)
            }
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Pipeline(head, stages) => {
                let mut value = self.eval_inner(head, ctx)?;
                for stage in stages {
                    value = self.apply_stage(stage, value, ctx)?;
                }
                Ok(value)
            }
        }
    }

    fn apply_stage(
        &self,
        stage: &PipeStage,
        input: Value,
        ctx: &Context<'_>,
    ) -> Result<Value, EvaluationError> {
        let func = self
            .funcs
            .get(&stage.func)
            .ok_or_else(|| EvaluationError::UnknownFunction(stage.func.clone()))?;
        let mut args = Vec::with_capacity(stage.args.len() + 1);
        args.push(input);
        for arg in &stage.args {
            args.push(self.eval_inner(arg, ctx)?);
        }
        func(&args)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn fn_upper(args: &[Value]) -> Result<Value, EvaluationError> {
    Ok(Value::String(args[0].render().to_uppercase()))
}

fn fn_lower(args: &[Value]) -> Result<Value, EvaluationError> {
    Ok(Value::String(args[0].render().to_lowercase()))
}

fn fn_len(args: &[Value]) -> Result<Value, EvaluationError> {
    let len = match &args[0] {
        Value::List(items) => items.len(),
        Value::Map(fields) => fields.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(EvaluationError::TypeMismatch {
                expected: "list, map, or string",
                found: type_name(other),
            })
        }
    };
    Ok(Value::Number(serde_json::Number::from(len)))
}

fn fn_default(args: &[Value]) -> Result<Value, EvaluationError> {
    if args.len() < 2 {
        return Err(EvaluationError::FunctionFailed {
            func: "default".to_string(),
            reason: "requires one argument".to_string(),
        });
    }
    // `input | default fallback` — Go convention passes the fallback as the
    // pipe argument and the piped value as the last positional argument.
    if args[0].is_empty() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Map(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    /// Installs a `tracing` subscriber for the duration of the test process.
    /// Idempotent via `try_init`, since more than one test calls it.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    #[test]
    fn resolves_dotted_path() {
        let mut map = IndexMap::new();
        map.insert("Name".to_string(), Value::String("Alice".to_string()));
        let data = Value::Map(map);
        let ctx = Context::root(&data);
        let expr = parse_expr(".Name").unwrap();
        let eval = Evaluator::default();
        assert_eq!(eval.eval(&expr, &ctx).unwrap(), Value::String("Alice".to_string()));
    }

    #[test]
    fn missing_field_is_an_error() {
        let data = Value::Map(IndexMap::new());
        let ctx = Context::root(&data);
        let expr = parse_expr(".Missing").unwrap();
        let eval = Evaluator::default();
        assert!(matches!(eval.eval(&expr, &ctx), Err(EvaluationError::MissingField { .. })));
    }

    #[test]
    fn pipeline_applies_functions_left_to_right() {
        let data = Value::String("hi".to_string());
        let ctx = Context::root(&data);
        let expr = parse_expr(". | upper").unwrap();
        let eval = Evaluator::default();
        assert_eq!(eval.eval(&expr, &ctx).unwrap(), Value::String("HI".to_string()));
    }

    fn fn_panics(_args: &[Value]) -> Result<Value, EvaluationError> {
        panic!("boom")
    }

    #[test]
    fn panicking_function_is_caught_at_the_boundary() {
        init_tracing();
        let data = Value::String("hi".to_string());
        let ctx = Context::root(&data);
        let expr = parse_expr(". | boom").unwrap();
        let eval = Evaluator::default().with_func("boom", fn_panics);
        assert!(matches!(eval.eval(&expr, &ctx), Err(EvaluationError::Panicked(_))));
    }
}
