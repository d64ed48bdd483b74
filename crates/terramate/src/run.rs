//! run environment
//!
//! `terramate.config.run.env` declares environment variables for commands
//! executed inside a stack. The nearest definition walking from the stack
//! directory up to the project root wins. Attribute values are evaluated
//! with the stack's `terramate` and `global` namespaces plus `env`, the
//! host process environment.

use std::path::Path;

use hcl::value::Map;
use hcl::Value;

use crate::config;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::eval;
use crate::globals;
use crate::project;
use crate::stack::Stack;

/// Environment variables in `KEY=value` form, ordered by key.
pub type EnvVars = Vec<String>;

/// Loads the run environment of a stack.
pub fn load_env(root: &Path, stack: &Stack) -> Result<EnvVars, ErrorList> {
    let Some(env_attrs) = find_env_definition(root, stack.host_path())? else {
        return Ok(EnvVars::new());
    };

    let resolved_globals = globals::load(root, stack)
        .map_err(|err| ErrorList::from(Error::wrap(ErrorKind::LoadingGlobals, err)))?;

    let mut ctx = eval::Context::new();
    ctx.set_namespace("terramate", stack.metadata_value());
    ctx.set_namespace("global", resolved_globals.value());
    ctx.set_namespace("env", host_env());

    let mut errs = ErrorList::new();
    let mut env_vars = EnvVars::new();

    let mut names: Vec<&String> = env_attrs.attributes.keys().collect();
    names.sort();

    for name in names {
        let attr = &env_attrs.attributes[name];
        let expr: hcl::Expression = attr.expr.clone().into();
        let Some(value) = errs.collect(ctx.eval(&expr)) else {
            continue;
        };
        match value {
            Value::String(s) => env_vars.push(format!("{name}={s}")),
            other => {
                errs.push(Error::new(
                    ErrorKind::Schema,
                    format!(
                        "terramate.config.run.env.{name} must be a string but is {}",
                        value_type(&other)
                    ),
                ));
            }
        }
    }

    errs.into_result()?;
    Ok(env_vars)
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Walks from the stack directory to the root looking for the nearest
/// `terramate.config.run.env` definition.
fn find_env_definition(root: &Path, stack_dir: &Path) -> Result<Option<config::RunEnv>, ErrorList> {
    let mut dir = stack_dir.to_path_buf();
    loop {
        let mut cfg = config::load_dir(root, &dir)?;
        if cfg.has_run_env() {
            let env = cfg
                .terramate
                .take()
                .and_then(|tm| tm.config)
                .and_then(|root_cfg| root_cfg.run)
                .and_then(|run| run.env)
                .expect("has_run_env checked");
            return Ok(Some(env));
        }

        if dir == root {
            return Ok(None);
        }
        match project::parent_dir(&dir) {
            Some(parent) => dir = parent.to_path_buf(),
            None => return Ok(None),
        }
    }
}

/// The process environment as the `env` namespace.
fn host_env() -> Value {
    let mut env = Map::new();
    for (key, value) in std::env::vars() {
        env.insert(key, Value::from(value));
    }
    Value::Object(env)
}
