//! visitor pattern helpers over evaluable expressions

use hcl::template::{Directive, Element};
use hcl::{Expression, Operation, Template};

/// Visitor that inspects its subjects immutably.
pub trait Visit<T> {
    fn visit(&mut self, value: &T);
}

// blanket impl for FnMut
impl<T, F> Visit<T> for F
where
    F: FnMut(&T),
{
    fn visit(&mut self, value: &T) {
        self(value)
    }
}

/// Recursively visit every [Expression] node, including the ones nested in
/// string templates.
pub trait VisitExpressions {
    fn visit_expressions(&self, visitor: &mut dyn Visit<Expression>);
}

impl VisitExpressions for Expression {
    fn visit_expressions(&self, visitor: &mut dyn Visit<Expression>) {
        visitor.visit(self);

        match self {
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_expressions(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values() {
                    value.visit_expressions(visitor);
                }
            }
            Expression::Traversal(traversal) => {
                traversal.expr.visit_expressions(visitor);
            }
            Expression::FuncCall(call) => {
                for arg in &call.args {
                    arg.visit_expressions(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_expressions(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_expressions(visitor);
                cond.true_expr.visit_expressions(visitor);
                cond.false_expr.visit_expressions(visitor);
            }
            Expression::Operation(operation) => match operation.as_ref() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_expressions(visitor);
                    binop.rhs_expr.visit_expressions(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_expressions(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr
                    .cond_expr
                    .iter()
                    .for_each(|e| e.visit_expressions(visitor));
                forexpr
                    .key_expr
                    .iter()
                    .for_each(|e| e.visit_expressions(visitor));
                forexpr.value_expr.visit_expressions(visitor);
                forexpr.collection_expr.visit_expressions(visitor);
            }
            Expression::TemplateExpr(template_expr) => {
                if let Ok(template) = Template::from_expr(template_expr) {
                    template.visit_expressions(visitor);
                }
            }
            _ => {}
        }
    }
}

impl VisitExpressions for Template {
    fn visit_expressions(&self, visitor: &mut dyn Visit<Expression>) {
        for element in self.elements() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_expressions(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_expressions(visitor);
                        ifdir.true_template.visit_expressions(visitor);
                        ifdir
                            .false_template
                            .iter()
                            .for_each(|t| t.visit_expressions(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.collection_expr.visit_expressions(visitor);
                        fordir.template.visit_expressions(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

/// A `namespace.attr` style reference found in an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub root: String,
    pub attr: Option<String>,
}

/// Collects every variable reference of an expression: bare variables and
/// the root (plus first attribute access) of traversals.
pub fn collect_refs(expr: &Expression) -> Vec<VarRef> {
    let mut refs = Vec::new();
    let mut collector = |expr: &Expression| match expr {
        Expression::Variable(var) => refs.push(VarRef {
            root: var.as_str().to_string(),
            attr: None,
        }),
        Expression::Traversal(traversal) => {
            if let Expression::Variable(var) = &traversal.expr {
                let attr = traversal.operators.first().and_then(|op| match op {
                    hcl::TraversalOperator::GetAttr(ident) => Some(ident.as_str().to_string()),
                    hcl::TraversalOperator::Index(Expression::String(key)) => Some(key.clone()),
                    _ => None,
                });
                refs.push(VarRef {
                    root: var.as_str().to_string(),
                    attr,
                });
            }
        }
        _ => {}
    };
    expr.visit_expressions(&mut collector);
    refs
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Expression {
        let expr: hcl_edit::expr::Expression = input.parse().expect("expression must parse");
        expr.into()
    }

    #[test]
    fn collects_traversal_roots() {
        let refs = collect_refs(&parse("global.a + terramate.path"));
        assert_eq!(
            refs,
            vec![
                VarRef {
                    root: "global".to_string(),
                    attr: Some("a".to_string())
                },
                VarRef {
                    root: "terramate".to_string(),
                    attr: Some("path".to_string())
                },
            ]
        );
    }

    #[test]
    fn sees_inside_templates_and_calls() {
        let refs = collect_refs(&parse(r#"tm_upper("${global.name}")"#));
        assert_eq!(
            refs,
            vec![VarRef {
                root: "global".to_string(),
                attr: Some("name".to_string())
            }]
        );
    }

    #[test]
    fn literal_has_no_refs() {
        assert_eq!(collect_refs(&parse("[1, 2, 3]")), vec![]);
    }
}
