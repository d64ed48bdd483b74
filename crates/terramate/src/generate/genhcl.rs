//! `generate_hcl` loading and evaluation

use std::path::{Path, PathBuf};

use crate::config::GenHclBlock;
use crate::error::{Error, ErrorList};
use crate::eval::partial::PartialEvaluator;
use crate::eval::Context;
use crate::globals::Globals;
use crate::project;
use crate::stack::Stack;

/// All generated HCL code for a stack, keyed by filename.
#[derive(Debug, Default)]
pub struct StackHcls {
    hcls: indexmap::IndexMap<String, GenHcl>,
}

/// Generated HCL code from a single `generate_hcl` block.
#[derive(Debug)]
pub struct GenHcl {
    /// Project-absolute path of the configuration that originated the code.
    origin: PathBuf,
    body: String,
    condition: bool,
}

impl StackHcls {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &GenHcl)> {
        self.hcls.iter()
    }
}

impl GenHcl {
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Result of the block's `condition` attribute; false means no file.
    pub fn condition(&self) -> bool {
        self.condition
    }
}

/// Loads and evaluates every `generate_hcl` block visible to the stack.
/// Blocks are collected from the stack directory up to the project root and
/// labels must be unique across the whole chain.
pub fn load(root: &Path, stack: &Stack, globals: &Globals) -> Result<StackHcls, ErrorList> {
    tracing::trace!(stack = %stack, "loading generate_hcl blocks");

    let blocks = super::load_chain(
        root,
        stack.host_path(),
        |cfg| cfg.generate_hcls.clone(),
        |block: &GenHclBlock| (block.label.clone(), block.origin.clone()),
    )?;

    let mut ctx = Context::new();
    ctx.set_namespace("terramate", stack.metadata_value());
    ctx.set_namespace("global", globals.value());
    let evaluator = PartialEvaluator::new(&ctx);

    let mut res = StackHcls::default();
    for (label, block) in blocks {
        let origin = project::prj_abs_path(root, &block.origin);

        let condition = super::eval_condition(&ctx, block.condition.as_ref())
            .map_err(|err| block_err(&block, &label, err))?;
        if !condition {
            res.hcls.insert(
                label,
                GenHcl {
                    origin,
                    body: String::new(),
                    condition: false,
                },
            );
            continue;
        }

        let body = evaluator
            .eval_body(block.content.clone())
            .map_err(|err| block_err(&block, &label, err))?;

        res.hcls.insert(
            label,
            GenHcl {
                origin,
                body: body.to_string(),
                condition: true,
            },
        );
    }

    Ok(res)
}

fn block_err(block: &GenHclBlock, label: &str, err: Error) -> ErrorList {
    let err = Error::new(
        err.kind(),
        format!("generate_hcl {label:?}: {}", err.message()),
    );
    let err = match &block.range {
        Some(range) => err.at(range.clone()),
        None => err,
    };
    err.into()
}
