//! hierarchical globals resolution
//!
//! Globals are collected walking from the stack directory up to the project
//! root. A name defined closer to the stack shadows the same name defined
//! above it; redefining a name within one directory level is an error caught
//! at parse time.
//!
//! The collected expressions may reference each other (`global.a` using
//! `global.b`), so resolution runs a fixed point: every pass evaluates the
//! pending attributes whose `global` references are already resolved and
//! refreshes the `global` namespace, until nothing is pending or a pass
//! makes no progress. Acyclic graphs converge; cycles and self-references
//! end up reported as the set of names that never evaluated.

use std::path::Path;

use hcl::value::Map;
use hcl::Value;

use crate::config;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::eval::{self, collect_refs};
use crate::project;
use crate::stack::Stack;

/// Resolved globals of one stack.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    attributes: Map<String, Value>,
}

impl Globals {
    /// The resolved mapping as the `global` namespace value.
    pub fn value(&self) -> Value {
        Value::Object(self.attributes.clone())
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Loads and resolves every global visible to the given stack.
pub fn load(root: &Path, stack: &Stack) -> Result<Globals, ErrorList> {
    tracing::trace!(stack = %stack, "loading globals");

    let exprs = collect_exprs(root, stack.host_path())?;
    resolve(stack, exprs)
}

/// Collects unevaluated globals expressions from the stack directory up to
/// the root, child-most first so that deeper definitions win.
fn collect_exprs(
    root: &Path,
    stack_dir: &Path,
) -> Result<indexmap::IndexMap<String, config::Attribute>, ErrorList> {
    let mut exprs: indexmap::IndexMap<String, config::Attribute> = indexmap::IndexMap::new();
    let mut dir = stack_dir.to_path_buf();

    loop {
        let mut errs = ErrorList::new();
        errs.merge_wrap(
            ErrorKind::GlobalParse,
            config::load_dir(root, &dir).map(|cfg| {
                for (name, attr) in cfg.globals {
                    // deeper definitions were inserted first and win
                    exprs.entry(name).or_insert(attr);
                }
            }),
        );
        errs.into_result()?;

        if dir == root {
            break;
        }
        match project::parent_dir(&dir) {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(exprs)
}

fn resolve(
    stack: &Stack,
    exprs: indexmap::IndexMap<String, config::Attribute>,
) -> Result<Globals, ErrorList> {
    let mut ctx = eval::Context::new();
    ctx.set_namespace("terramate", stack.metadata_value());
    ctx.set_namespace("global", Value::Object(Map::new()));

    let mut pending = exprs;
    let mut resolved: Map<String, Value> = Map::new();

    while !pending.is_empty() {
        let mut progress = false;
        let mut transient: Vec<(String, Error)> = Vec::new();

        let names: Vec<String> = pending.keys().cloned().collect();
        for name in names {
            let attr = &pending[&name];
            let expr: hcl::Expression = attr.expr.clone().into();

            match classify(&name, &expr, &pending, &resolved) {
                Dependencies::Fatal(err) => {
                    let err = match &attr.range {
                        Some(range) => err.at(range.clone()),
                        None => err,
                    };
                    return Err(err.into());
                }
                Dependencies::Blocked => continue,
                Dependencies::Ready => {}
            }

            match ctx.eval(&expr) {
                Ok(value) => {
                    tracing::trace!(global = %name, "global evaluated");
                    resolved.insert(name.clone(), value);
                    pending.shift_remove(&name);
                    ctx.set_namespace("global", Value::Object(resolved.clone()));
                    progress = true;
                }
                Err(err) => {
                    let err = Error::new(
                        ErrorKind::GlobalEval,
                        format!("global {name:?}: {}", err.message()),
                    );
                    let err = match &attr.range {
                        Some(range) => err.at(range.clone()),
                        None => err,
                    };
                    transient.push((name, err));
                }
            }
        }

        if !progress {
            let mut errs = ErrorList::from(Error::new(
                ErrorKind::GlobalEval,
                format!("unable to evaluate {} globals", pending.len()),
            ));
            for (_, err) in transient {
                errs.push(err);
            }
            return Err(errs);
        }
    }

    Ok(Globals {
        attributes: resolved,
    })
}

enum Dependencies {
    /// Every referenced global is resolved.
    Ready,
    /// References a global still pending evaluation.
    Blocked,
    Fatal(Error),
}

fn classify(
    name: &str,
    expr: &hcl::Expression,
    pending: &indexmap::IndexMap<String, config::Attribute>,
    resolved: &Map<String, Value>,
) -> Dependencies {
    let mut blocked = false;

    for reference in collect_refs(expr) {
        match reference.root.as_str() {
            "global" => match reference.attr {
                Some(dep) => {
                    if resolved.contains_key(&dep) {
                        continue;
                    }
                    if pending.contains_key(&dep) {
                        // self-references block forever and surface as an
                        // unevaluated set once the pass stalls
                        blocked = true;
                        continue;
                    }
                    return Dependencies::Fatal(Error::new(
                        ErrorKind::GlobalEval,
                        format!("global {name:?} references undefined global {dep:?}"),
                    ));
                }
                None => continue,
            },
            "terramate" => continue,
            other => {
                return Dependencies::Fatal(Error::new(
                    ErrorKind::GlobalEval,
                    format!("global {name:?} references unknown namespace {other:?}"),
                ));
            }
        }
    }

    if blocked {
        Dependencies::Blocked
    } else {
        Dependencies::Ready
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_stack(root: &Path) -> Stack {
        crate::stack::test_stack(root, &root.join("stacks/test"))
    }

    fn attr(expr: &str) -> config::Attribute {
        config::Attribute {
            origin: "test.tm".into(),
            expr: expr.parse().expect("expression must parse"),
            range: None,
        }
    }

    fn resolve_map(entries: &[(&str, &str)]) -> Result<Globals, ErrorList> {
        let root = Path::new("/project");
        let stack = test_stack(root);
        let exprs = entries
            .iter()
            .map(|(name, expr)| (name.to_string(), attr(expr)))
            .collect();
        resolve(&stack, exprs)
    }

    #[test]
    fn resolves_literals() {
        let globals = resolve_map(&[("a", "1"), ("b", "\"x\"")]).expect("must resolve");
        assert_eq!(globals.get("a"), Some(&Value::from(1)));
        assert_eq!(globals.get("b"), Some(&Value::from("x")));
    }

    #[test]
    fn resolves_inter_global_references() {
        let globals = resolve_map(&[("a", "global.b + 1"), ("b", "2")]).expect("must resolve");
        assert_eq!(globals.get("a"), Some(&Value::from(3)));
        assert_eq!(globals.get("b"), Some(&Value::from(2)));
    }

    #[test]
    fn resolves_metadata_references() {
        let globals =
            resolve_map(&[("stack_path", "terramate.path")]).expect("must resolve");
        assert_eq!(globals.get("stack_path"), Some(&Value::from("/stacks/test")));
    }

    #[test]
    fn self_reference_reports_unevaluated_set() {
        let err = resolve_map(&[("c", "global.c")]).expect_err("must fail");
        assert!(err.has_kind(ErrorKind::GlobalEval));
        assert!(err
            .iter()
            .any(|e| e.message().contains("unable to evaluate 1 globals")));
    }

    #[test]
    fn cycle_reports_unevaluated_set() {
        let err =
            resolve_map(&[("a", "global.b"), ("b", "global.a")]).expect_err("must fail");
        assert!(err
            .iter()
            .any(|e| e.message().contains("unable to evaluate 2 globals")));
    }

    #[test]
    fn undefined_global_reference_is_fatal() {
        let err = resolve_map(&[("a", "global.missing")]).expect_err("must fail");
        assert!(err.has_kind(ErrorKind::GlobalEval));
        assert!(err.iter().any(|e| e.message().contains("undefined global")));
    }

    #[test]
    fn unknown_namespace_is_fatal() {
        let err = resolve_map(&[("a", "local.x")]).expect_err("must fail");
        assert!(err.iter().any(|e| e.message().contains("unknown namespace")));
    }
}
