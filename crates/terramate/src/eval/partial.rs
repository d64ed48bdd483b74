//! partial evaluation of configuration expressions
//!
//! Rewrites only the sub-expressions owned by Terramate: `global.*` and
//! `terramate.*` variable chains and `tm_` prefixed function calls. Every
//! other node, unknown namespaces included, is preserved byte-for-byte; the
//! decor-preserving expression tree is what makes untouched nodes
//! re-serialize exactly as written, comments and whitespace included.

use hcl_edit::expr::{Expression, TraversalOperator};
use hcl_edit::structure::{Body, Structure};
use hcl_edit::template::{Element, Strip};
use hcl_edit::Decorate;

use crate::error::{Error, ErrorKind};
use crate::eval::{collect_refs, Context};

/// What a walk learned about the expression it rewrote.
#[derive(Debug, Default, Clone, Copy)]
struct Outcome {
    has_conditional: bool,
    has_operation: bool,
    /// Some reference or call was preserved verbatim.
    unresolved: bool,
}

impl Outcome {
    fn verbatim() -> Outcome {
        Outcome {
            unresolved: true,
            ..Outcome::default()
        }
    }

    fn absorb(&mut self, other: Outcome) {
        self.has_conditional |= other.has_conditional;
        self.has_operation |= other.has_operation;
        self.unresolved |= other.unresolved;
    }

    /// An interpolation piece only drops its `${}` wrapper when the inner
    /// expression got fully rewritten into a plain value.
    fn keeps_wrapper(&self) -> bool {
        self.has_conditional || self.has_operation || self.unresolved
    }
}

/// Partial evaluator for one stack's evaluation context.
#[derive(derive_new::new)]
pub struct PartialEvaluator<'c> {
    ctx: &'c Context,
}

impl<'c> PartialEvaluator<'c> {
    /// Rewrites a whole body, attribute by attribute, recursing into nested
    /// blocks. Used for `generate_hcl` content blocks.
    pub fn eval_body(&self, body: Body) -> Result<Body, Error> {
        let mut out = Body::new();
        for structure in body.into_iter() {
            match structure {
                Structure::Attribute(mut attr) => {
                    let name = attr.key.value().as_str().to_string();
                    self.eval_expression(&mut attr.value).map_err(|err| {
                        Error::new(
                            err.kind(),
                            format!("evaluating attribute {name:?}: {}", err.message()),
                        )
                    })?;
                    out.push(Structure::Attribute(attr));
                }
                Structure::Block(mut block) => {
                    block.body = self.eval_body(block.body)?;
                    out.push(Structure::Block(block));
                }
            }
        }
        Ok(out)
    }

    /// Rewrites a single expression in place.
    pub fn eval_expression(&self, expr: &mut Expression) -> Result<(), Error> {
        self.walk(expr)?;
        Ok(())
    }

    fn walk(&self, expr: &mut Expression) -> Result<Outcome, Error> {
        match expr {
            Expression::Variable(_) => {
                // a bare identifier is not a variable chain, not even
                // `global` itself
                Ok(Outcome::verbatim())
            }

            Expression::Traversal(_) => self.walk_traversal(expr),

            Expression::FuncCall(_) => self.walk_func_call(expr),

            Expression::Array(array) => {
                let mut outcome = Outcome::default();
                for item in array.iter_mut() {
                    outcome.absorb(self.walk(item)?);
                }
                Ok(outcome)
            }

            Expression::Object(object) => {
                let mut outcome = Outcome::default();
                for (_, value) in object.iter_mut() {
                    outcome.absorb(self.walk(value.expr_mut())?);
                }
                Ok(outcome)
            }

            Expression::Parenthesis(paren) => self.walk(paren.inner_mut()),

            Expression::Conditional(cond) => {
                let mut outcome = Outcome {
                    has_conditional: true,
                    ..Outcome::default()
                };
                outcome.absorb(self.walk(&mut cond.cond_expr)?);
                outcome.absorb(self.walk(&mut cond.true_expr)?);
                outcome.absorb(self.walk(&mut cond.false_expr)?);
                Ok(outcome)
            }

            Expression::BinaryOp(binop) => {
                let mut outcome = Outcome {
                    has_operation: true,
                    ..Outcome::default()
                };
                outcome.absorb(self.walk(&mut binop.lhs_expr)?);
                outcome.absorb(self.walk(&mut binop.rhs_expr)?);
                Ok(outcome)
            }

            Expression::UnaryOp(unop) => {
                let mut outcome = Outcome {
                    has_operation: true,
                    ..Outcome::default()
                };
                outcome.absorb(self.walk(&mut unop.expr)?);
                Ok(outcome)
            }

            Expression::ForExpr(_) => {
                // evaluating inside a `for` would shadow the loop bindings,
                // so terramate references are rejected instead of rewritten
                for reference in expr_refs(expr) {
                    if is_terramate_namespace(&reference) {
                        return Err(Error::new(
                            ErrorKind::ForExprDisallowEval,
                            format!("`for` expression references {reference}.*"),
                        ));
                    }
                }
                Ok(Outcome::verbatim())
            }

            Expression::StringTemplate(_) => self.walk_string_template(expr),

            // emitted verbatim up to the closing delimiter
            Expression::HeredocTemplate(_) => Ok(Outcome::verbatim()),

            _ => Ok(Outcome::default()),
        }
    }

    /// Variable chains: `global.*` / `terramate.*` roots evaluate as one
    /// expression, indexes included. Chains rooted anywhere else are
    /// emitted verbatim, their index sub-expressions included.
    fn walk_traversal(&self, expr: &mut Expression) -> Result<Outcome, Error> {
        if traversal_evaluates(expr) {
            let value = self.eval_node(expr)?;
            replace_with_value(expr, &value)?;
            return Ok(Outcome::default());
        }

        let Expression::Traversal(traversal) = expr else {
            unreachable!("walk_traversal expects a traversal");
        };

        match &mut traversal.expr {
            // unknown-rooted chains are a single unit, kept wholesale
            Expression::Variable(_) => Ok(Outcome::verbatim()),
            root => {
                let mut outcome = Outcome::verbatim();
                outcome.absorb(self.walk(root)?);
                for operator in traversal.operators.iter_mut() {
                    if let TraversalOperator::Index(index) = operator.value_mut() {
                        outcome.absorb(self.walk(index)?);
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// Function calls: the `tm_` prefix means "evaluate now", anything else
    /// is kept with its arguments rewritten individually.
    fn walk_func_call(&self, expr: &mut Expression) -> Result<Outcome, Error> {
        if matches!(expr, Expression::FuncCall(call) if is_tm_funcall(call)) {
            let value = self.eval_node(expr)?;
            replace_with_value(expr, &value)?;
            return Ok(Outcome::default());
        }

        let Expression::FuncCall(call) = expr else {
            unreachable!("walk_func_call expects a function call");
        };

        let mut outcome = Outcome::verbatim();
        for arg in call.args.iter_mut() {
            outcome.absorb(self.walk(arg)?);
        }
        Ok(outcome)
    }

    /// Quoted string templates.
    fn walk_string_template(&self, expr: &mut Expression) -> Result<Outcome, Error> {
        let Expression::StringTemplate(template) = expr else {
            unreachable!("walk_string_template expects a template");
        };

        let mut outcome = Outcome::default();
        let mut resolved = 0usize;
        let mut directives = false;
        let mut pieces = Vec::new();

        for element in template.iter_mut() {
            match element {
                Element::Literal(lit) => {
                    pieces.push(Piece::Literal(lit.value().clone()));
                }
                Element::Interpolation(interp) => {
                    let inner = self.walk(&mut interp.expr)?;
                    if inner.keeps_wrapper() {
                        outcome.absorb(inner);
                        pieces.push(Piece::Wrapped(
                            interp.expr.to_string(),
                            interp.strip,
                        ));
                        continue;
                    }

                    match literal_value(&interp.expr) {
                        Some(value) => {
                            resolved += 1;
                            pieces.push(Piece::Value(value));
                        }
                        None => {
                            outcome.absorb(Outcome::verbatim());
                            pieces.push(Piece::Wrapped(
                                interp.expr.to_string(),
                                interp.strip,
                            ));
                        }
                    }
                }
                Element::Directive(_) => {
                    // directives are preserved like any other foreign
                    // construct; pieces of this template cannot be merged
                    directives = true;
                    outcome.absorb(Outcome::verbatim());
                }
            }
        }

        if resolved == 0 {
            // nothing was rewritten into a value, the in-place rewrites
            // above are all that changes
            return Ok(outcome);
        }

        let npieces = pieces.len();

        // single interpolation of the exact form "${expr}": the value
        // keeps its type, dropping the quotes unless it is a string
        if npieces == 1 && !directives {
            if let Piece::Value(value) = &pieces[0] {
                replace_with_value(expr, value)?;
                return Ok(Outcome::default());
            }
        }

        if directives {
            // resolved values were already substituted in place inside
            // their wrappers, the template shape stays
            return Ok(outcome);
        }

        // merge the pieces back into one quoted string
        let mut text = String::from("\"");
        for piece in &pieces {
            match piece {
                Piece::Literal(lit) => text.push_str(&escape_template_literal(lit)),
                Piece::Value(value) => match value {
                    hcl::Value::Array(_) | hcl::Value::Object(_) => {
                        return Err(Error::new(
                            ErrorKind::InterpolationEval,
                            "serialization of collection value is not supported",
                        ));
                    }
                    scalar => {
                        let s = super::funcs::scalar_string(scalar)
                            .map_err(|err| Error::new(ErrorKind::InterpolationEval, err))?;
                        text.push_str(&escape_template_literal(&s));
                    }
                },
                Piece::Wrapped(inner, strip) => {
                    let (open, close) = strip_markers(strip);
                    text.push_str("${");
                    text.push_str(open);
                    text.push_str(inner);
                    text.push_str(close);
                    text.push('}');
                }
            }
        }
        text.push('"');

        let rewritten: Expression = text.parse().map_err(|err| {
            Error::new(
                ErrorKind::InterpolationEval,
                format!("rebuilding interpolated string `{text}`: {err}"),
            )
        })?;
        replace_keeping_decor(expr, rewritten);
        Ok(outcome)
    }

    fn eval_node(&self, expr: &Expression) -> Result<hcl::Value, Error> {
        let evaluable: hcl::Expression = expr.clone().into();
        self.ctx
            .eval(&evaluable)
            .map_err(|err| Error::new(ErrorKind::PartialEval, err.message().to_string()))
    }
}

enum Piece {
    Literal(String),
    Value(hcl::Value),
    Wrapped(String, Strip),
}

/// Tells if a traversal is a Terramate-owned chain that evaluates as one
/// expression: a `global`/`terramate` variable root followed by an
/// attribute access, or a `tm_` function call root.
fn traversal_evaluates(expr: &Expression) -> bool {
    let Expression::Traversal(traversal) = expr else {
        return false;
    };
    match &traversal.expr {
        Expression::Variable(var) => {
            let starts_with_attr = matches!(
                traversal.operators.first().map(|op| op.value()),
                Some(TraversalOperator::GetAttr(_)) | Some(TraversalOperator::LegacyIndex(_))
            );
            matches!(var.value().as_str(), "global" | "terramate") && starts_with_attr
        }
        Expression::FuncCall(call) => is_tm_funcall(call),
        _ => false,
    }
}

fn is_tm_funcall(call: &hcl_edit::expr::FuncCall) -> bool {
    call.name.namespace.is_empty() && call.name.name.value().as_str().starts_with("tm_")
}

fn is_terramate_namespace(root: &str) -> bool {
    matches!(root, "global" | "terramate")
}

/// Root namespaces referenced anywhere inside the expression.
fn expr_refs(expr: &Expression) -> Vec<String> {
    let evaluable: hcl::Expression = expr.clone().into();
    let mut roots: Vec<String> = collect_refs(&evaluable)
        .into_iter()
        .map(|reference| reference.root)
        .collect();
    roots.dedup();
    roots
}

/// The value of a fully rewritten literal node, seeing through parenthesis.
fn literal_value(expr: &Expression) -> Option<hcl::Value> {
    let evaluable: hcl::Expression = expr.clone().into();
    expr_value(&evaluable)
}

fn expr_value(expr: &hcl::Expression) -> Option<hcl::Value> {
    match expr {
        hcl::Expression::Null => Some(hcl::Value::Null),
        hcl::Expression::Bool(b) => Some(hcl::Value::Bool(*b)),
        hcl::Expression::Number(num) => Some(hcl::Value::Number(num.clone())),
        hcl::Expression::String(s) => Some(hcl::Value::String(s.clone())),
        hcl::Expression::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(expr_value(item)?);
            }
            Some(hcl::Value::Array(values))
        }
        hcl::Expression::Object(object) => {
            let mut map = hcl::value::Map::new();
            for (key, value) in object {
                let key = match key {
                    hcl::ObjectKey::Identifier(ident) => ident.to_string(),
                    hcl::ObjectKey::Expression(hcl::Expression::String(s)) => s.clone(),
                    _ => return None,
                };
                map.insert(key, expr_value(value)?);
            }
            Some(hcl::Value::Object(map))
        }
        hcl::Expression::Parenthesis(inner) => expr_value(inner),
        _ => None,
    }
}

/// Replaces the node with the literal serialization of a value, keeping the
/// surrounding decor.
fn replace_with_value(expr: &mut Expression, value: &hcl::Value) -> Result<(), Error> {
    let text = format_value(value);
    let rewritten: Expression = text.parse().map_err(|err| {
        Error::new(
            ErrorKind::PartialEval,
            format!("serializing value `{text}`: {err}"),
        )
    })?;
    replace_keeping_decor(expr, rewritten);
    Ok(())
}

fn replace_keeping_decor(expr: &mut Expression, mut rewritten: Expression) {
    *rewritten.decor_mut() = expr.decor().clone();
    *expr = rewritten;
}

/// Token serialization of an evaluated value.
pub(crate) fn format_value(value: &hcl::Value) -> String {
    match value {
        hcl::Value::Null => "null".to_string(),
        hcl::Value::Bool(b) => b.to_string(),
        hcl::Value::Number(num) => num.to_string(),
        hcl::Value::String(s) => format!("\"{}\"", escape_template_literal(s)),
        hcl::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        hcl::Value::Object(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let parts: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{} = {}", format_key(key), format_value(value)))
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

fn format_key(key: &str) -> String {
    let is_ident = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if is_ident {
        key.to_string()
    } else {
        format!("\"{}\"", escape_template_literal(key))
    }
}

/// Escapes a literal string for embedding in a quoted HCL template.
fn escape_template_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' => {
                out.push(ch);
                if chars.peek() == Some(&'{') {
                    // ${ and %{ open template sequences, double the sigil
                    out.push(ch);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn strip_markers(strip: &Strip) -> (&'static str, &'static str) {
    match strip {
        Strip::None => ("", ""),
        Strip::Start => ("~", ""),
        Strip::End => ("", "~"),
        Strip::Both => ("~", "~"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eval::Context;
    use hcl::value::Map;
    use hcl::Value;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        let mut ctx = Context::new();
        let mut globals = Map::new();
        globals.insert("n".to_string(), Value::from(42));
        globals.insert("name".to_string(), Value::from("stack-a"));
        globals.insert(
            "list".to_string(),
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]),
        );
        let mut obj = Map::new();
        obj.insert("a".to_string(), Value::from(1));
        globals.insert("obj".to_string(), Value::Object(obj));
        ctx.set_namespace("global", Value::Object(globals));

        let mut meta = Map::new();
        meta.insert("path".to_string(), Value::from("/stacks/a"));
        ctx.set_namespace("terramate", Value::Object(meta));
        ctx
    }

    fn partial(input: &str) -> Result<String, Error> {
        let ctx = ctx();
        let evaluator = PartialEvaluator::new(&ctx);
        let mut expr: Expression = input.parse().expect("expression must parse");
        evaluator.eval_expression(&mut expr)?;
        Ok(expr.to_string())
    }

    #[test]
    fn unknown_namespaces_are_byte_preserved() {
        for input in [
            "local.a",
            "merge(local.a, var.b)",
            "a.b[0].c",
            "[for v in local.l : upper(v)]",
            "count.index + 1",
            "data.aws_ami.ubuntu.id",
            "{ x = local.a, y = [1, 2] }",
            "(local.a)",
            "!local.enabled",
            "local.cond ? 1 : 2",
        ] {
            assert_eq!(partial(input).expect("must succeed"), input);
        }
    }

    #[test]
    fn global_chains_evaluate_in_place() {
        assert_eq!(partial("global.n").expect("must succeed"), "42");
        assert_eq!(
            partial("merge(local.a, global.list)").expect("must succeed"),
            "merge(local.a, [1, 2, 3])"
        );
        assert_eq!(
            partial("global.list[1]").expect("must succeed"),
            "2"
        );
        assert_eq!(
            partial("terramate.path").expect("must succeed"),
            "\"/stacks/a\""
        );
    }

    #[test]
    fn tm_calls_evaluate_and_plain_calls_stay() {
        assert_eq!(
            partial("tm_upper(global.name)").expect("must succeed"),
            "\"STACK-A\""
        );
        assert_eq!(
            partial("tm_try(global.missing, null)").expect("must succeed"),
            "null"
        );
        assert_eq!(
            partial("try(local.x, null)").expect("must succeed"),
            "try(local.x, null)"
        );
        assert_eq!(
            partial("upper(global.name)").expect("must succeed"),
            "upper(\"stack-a\")"
        );
    }

    #[test]
    fn interpolation_of_scalars_merges_into_the_string() {
        assert_eq!(partial(r#""x=${global.n}""#).expect("must succeed"), r#""x=42""#);
        assert_eq!(
            partial(r#""${global.name}-${global.n}""#).expect("must succeed"),
            r#""stack-a-42""#
        );
    }

    #[test]
    fn single_interpolation_keeps_the_value_type() {
        assert_eq!(partial(r#""${global.n}""#).expect("must succeed"), "42");
        assert_eq!(
            partial(r#""${global.obj}""#).expect("must succeed"),
            "{ a = 1 }"
        );
        assert_eq!(
            partial(r#""${global.list}""#).expect("must succeed"),
            "[1, 2, 3]"
        );
        assert_eq!(
            partial(r#""${global.name}""#).expect("must succeed"),
            "\"stack-a\""
        );
    }

    #[test]
    fn composite_interpolation_of_collections_fails() {
        let err = partial(r#""pre${global.obj}post""#).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InterpolationEval);

        let err = partial(r#""${global.obj}${global.n}""#).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InterpolationEval);
    }

    #[test]
    fn operations_inside_interpolation_keep_the_wrapper() {
        assert_eq!(
            partial(r#""${global.n + 1}""#).expect("must succeed"),
            r#""${42 + 1}""#
        );
        assert_eq!(
            partial(r#""${local.cond ? global.n : 0}""#).expect("must succeed"),
            r#""${local.cond ? 42 : 0}""#
        );
    }

    #[test]
    fn unresolved_interpolations_stay_wrapped() {
        assert_eq!(
            partial(r#""a-${local.x}""#).expect("must succeed"),
            r#""a-${local.x}""#
        );
        assert_eq!(
            partial(r#""${global.name}-${local.x}""#).expect("must succeed"),
            r#""stack-a-${local.x}""#
        );
    }

    #[test]
    fn for_expressions_reject_terramate_references() {
        let err = partial("[for v in global.list : v]").expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::ForExprDisallowEval);

        let err = partial("{for k, v in terramate.path : k => v}").expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::ForExprDisallowEval);
    }

    #[test]
    fn missing_global_fails_partial_eval() {
        let err = partial("global.missing").expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::PartialEval);
    }

    #[test]
    fn heredocs_are_preserved() {
        let input = "doc = <<-EOT\n  hello ${local.x}\n  EOT\n";
        let ctx = ctx();
        let body = hcl_edit::parser::parse_body(input).expect("body must parse");
        let out = PartialEvaluator::new(&ctx)
            .eval_body(body)
            .expect("must succeed");
        assert_eq!(out.to_string(), input);
    }

    #[test]
    fn comments_inside_collections_survive() {
        let input = "[\n  1, // one\n  local.a,\n]";
        assert_eq!(partial(input).expect("must succeed"), input);
    }

    #[test]
    fn bodies_rewrite_attribute_by_attribute() {
        let ctx = ctx();
        let evaluator = PartialEvaluator::new(&ctx);
        let body = hcl_edit::parser::parse_body(
            "x = global.n\nblock \"lbl\" {\n  y = local.a\n}\n",
        )
        .expect("body must parse");

        let out = evaluator.eval_body(body).expect("must succeed");
        assert_eq!(
            out.to_string(),
            "x = 42\nblock \"lbl\" {\n  y = local.a\n}\n"
        );
    }
}
