//! expression evaluation
//!
//! A [Context] carries the root namespaces visible to configuration
//! expressions (`global`, `terramate` and, for run environments, `env`) on
//! top of `hcl::eval` plus the `tm_` function table. Evaluation is
//! synchronous and fails fast.

pub mod funcs;
pub mod partial;
mod visit;

pub use visit::{collect_refs, VarRef, VisitExpressions};

use hcl::eval::Evaluate;
use hcl::{Expression, ObjectKey, Value};

use crate::error::{Error, ErrorKind};

/// Evaluation context for one stack.
pub struct Context {
    inner: hcl::eval::Context<'static>,
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Context {
        let mut inner = hcl::eval::Context::new();
        funcs::declare_all(&mut inner);
        Context { inner }
    }

    /// Replaces a root namespace.
    pub fn set_namespace(&mut self, name: &str, value: Value) {
        self.inner
            .declare_var(hcl::Identifier::unchecked(name), value);
    }

    /// Fully evaluates the expression, resolving `tm_try` calls first.
    pub fn eval(&self, expr: &Expression) -> Result<Value, Error> {
        let mut expr = expr.clone();
        self.resolve_try_calls(&mut expr)?;
        expr.evaluate(&self.inner)
            .map_err(|err| Error::new(ErrorKind::Eval, err.to_string()))
    }

    /// Rewrites `tm_try` calls bottom-up into the value of their first
    /// successfully evaluating argument. `hcl::eval` evaluates function
    /// arguments eagerly, so laziness has to happen before it runs.
    fn resolve_try_calls(&self, expr: &mut Expression) -> Result<(), Error> {
        let try_args = match expr {
            Expression::FuncCall(call) if call.name.name.as_str() == "tm_try" => {
                Some(call.args.clone())
            }
            _ => None,
        };

        if let Some(args) = try_args {
            if args.is_empty() {
                return Err(Error::new(
                    ErrorKind::Eval,
                    "tm_try requires at least one argument",
                ));
            }

            let mut last_err = None;
            for mut arg in args {
                let attempt = self.resolve_try_calls(&mut arg).and_then(|()| {
                    arg.evaluate(&self.inner)
                        .map_err(|err| Error::new(ErrorKind::Eval, err.to_string()))
                });
                match attempt {
                    Ok(value) => {
                        *expr = value_to_expression(value);
                        return Ok(());
                    }
                    Err(err) => last_err = Some(err),
                }
            }

            return Err(last_err.expect("tm_try has at least one argument"));
        }

        match expr {
            Expression::Array(array) => {
                for item in array {
                    self.resolve_try_calls(item)?;
                }
            }
            Expression::Object(object) => {
                for value in object.values_mut() {
                    self.resolve_try_calls(value)?;
                }
            }
            Expression::Traversal(traversal) => {
                self.resolve_try_calls(&mut traversal.expr)?;
            }
            Expression::FuncCall(call) => {
                for arg in &mut call.args {
                    self.resolve_try_calls(arg)?;
                }
            }
            Expression::Parenthesis(inner) => {
                self.resolve_try_calls(inner)?;
            }
            Expression::Conditional(cond) => {
                self.resolve_try_calls(&mut cond.cond_expr)?;
                self.resolve_try_calls(&mut cond.true_expr)?;
                self.resolve_try_calls(&mut cond.false_expr)?;
            }
            Expression::Operation(operation) => match operation.as_mut() {
                hcl::Operation::Binary(binop) => {
                    self.resolve_try_calls(&mut binop.lhs_expr)?;
                    self.resolve_try_calls(&mut binop.rhs_expr)?;
                }
                hcl::Operation::Unary(unop) => {
                    self.resolve_try_calls(&mut unop.expr)?;
                }
            },
            Expression::ForExpr(forexpr) => {
                if let Some(cond) = &mut forexpr.cond_expr {
                    self.resolve_try_calls(cond)?;
                }
                if let Some(key) = &mut forexpr.key_expr {
                    self.resolve_try_calls(key)?;
                }
                self.resolve_try_calls(&mut forexpr.value_expr)?;
                self.resolve_try_calls(&mut forexpr.collection_expr)?;
            }
            Expression::TemplateExpr(template_expr) => {
                if !template_has_try(template_expr) {
                    return Ok(());
                }
                let mut template = hcl::Template::from_expr(template_expr)
                    .map_err(|err| Error::new(ErrorKind::Eval, err.to_string()))?;
                self.resolve_in_template(&mut template)?;
                **template_expr = hcl::TemplateExpr::QuotedString(template.to_string());
            }
            _ => {}
        }

        Ok(())
    }

    fn resolve_in_template(&self, template: &mut hcl::Template) -> Result<(), Error> {
        use hcl::template::{Directive, Element};

        for element in template.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    self.resolve_try_calls(&mut interpolation.expr)?;
                }
                Element::Directive(Directive::If(ifdir)) => {
                    self.resolve_try_calls(&mut ifdir.cond_expr)?;
                    self.resolve_in_template(&mut ifdir.true_template)?;
                    if let Some(false_template) = &mut ifdir.false_template {
                        self.resolve_in_template(false_template)?;
                    }
                }
                Element::Directive(Directive::For(fordir)) => {
                    self.resolve_try_calls(&mut fordir.collection_expr)?;
                    self.resolve_in_template(&mut fordir.template)?;
                }
                Element::Literal(_) => {}
            }
        }
        Ok(())
    }
}

fn template_has_try(template_expr: &hcl::TemplateExpr) -> bool {
    let Ok(template) = hcl::Template::from_expr(template_expr) else {
        return false;
    };
    let mut found = false;
    template.visit_expressions(&mut |expr: &Expression| {
        if let Expression::FuncCall(call) = expr {
            if call.name.name.as_str() == "tm_try" {
                found = true;
            }
        }
    });
    found
}

/// Builds the literal expression for an evaluated value.
pub fn value_to_expression(value: Value) -> Expression {
    match value {
        Value::Null => Expression::Null,
        Value::Bool(b) => Expression::Bool(b),
        Value::Number(num) => Expression::Number(num),
        Value::String(s) => Expression::String(s),
        Value::Array(items) => {
            Expression::Array(items.into_iter().map(value_to_expression).collect())
        }
        Value::Object(map) => Expression::Object(
            map.into_iter()
                .map(|(key, value)| {
                    (
                        ObjectKey::Expression(Expression::String(key)),
                        value_to_expression(value),
                    )
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hcl::value::Map;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Expression {
        let expr: hcl_edit::expr::Expression = input.parse().expect("expression must parse");
        expr.into()
    }

    fn ctx_with_globals(globals: &[(&str, Value)]) -> Context {
        let mut ctx = Context::new();
        let map: Map<String, Value> = globals
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ctx.set_namespace("global", Value::Object(map));
        ctx
    }

    #[test]
    fn evaluates_namespaced_references() {
        let ctx = ctx_with_globals(&[("env", Value::from("prod"))]);
        let value = ctx.eval(&parse("global.env")).expect("must evaluate");
        assert_eq!(value, Value::from("prod"));
    }

    #[test]
    fn unknown_namespace_fails() {
        let ctx = Context::new();
        ctx.eval(&parse("local.a")).expect_err("must fail");
    }

    #[test]
    fn try_returns_first_success() {
        let ctx = ctx_with_globals(&[("a", Value::from(1))]);
        let value = ctx
            .eval(&parse("tm_try(global.missing, global.a, 3)"))
            .expect("must evaluate");
        assert_eq!(value, Value::from(1));
    }

    #[test]
    fn try_falls_back_to_literal() {
        let ctx = Context::new();
        let value = ctx
            .eval(&parse("tm_try(global.missing, null)"))
            .expect("must evaluate");
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn try_nested_inside_expressions() {
        let ctx = ctx_with_globals(&[("n", Value::from(2))]);
        let value = ctx
            .eval(&parse("[tm_try(global.missing, 0), tm_try(global.n, 0) + 1]"))
            .expect("must evaluate");
        assert_eq!(
            value,
            Value::Array(vec![Value::from(0), Value::from(3)])
        );
    }

    #[test]
    fn try_with_all_failures_reports_last() {
        let ctx = Context::new();
        let err = ctx
            .eval(&parse("tm_try(global.a, global.b)"))
            .expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::Eval);
    }

    #[test]
    fn value_round_trips_to_expression() {
        let mut map = Map::new();
        map.insert("a".to_string(), Value::from(1));
        let expr = value_to_expression(Value::Object(map));

        let ctx = Context::new();
        let value = ctx.eval(&expr).expect("must evaluate");
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map.get("a"), Some(&Value::from(1)));
    }
}
