//! `generate_file` loading and evaluation

use std::path::{Path, PathBuf};

use crate::config::GenFileBlock;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::eval::Context;
use crate::globals::Globals;
use crate::project;
use crate::stack::Stack;

/// All generated files for a stack, keyed by filename.
#[derive(Debug, Default)]
pub struct StackFiles {
    files: indexmap::IndexMap<String, GenFile>,
}

/// Generated file content from a single `generate_file` block.
#[derive(Debug)]
pub struct GenFile {
    /// Project-absolute path of the configuration that originated the file.
    origin: PathBuf,
    body: String,
    condition: bool,
}

impl StackFiles {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &GenFile)> {
        self.files.iter()
    }
}

impl GenFile {
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn condition(&self) -> bool {
        self.condition
    }
}

/// Loads and evaluates every `generate_file` block visible to the stack.
/// The `content` attribute is fully evaluated and must produce a string or
/// null; null means the file is skipped.
pub fn load(root: &Path, stack: &Stack, globals: &Globals) -> Result<StackFiles, ErrorList> {
    tracing::trace!(stack = %stack, "loading generate_file blocks");

    let blocks = super::load_chain(
        root,
        stack.host_path(),
        |cfg| cfg.generate_files.clone(),
        |block: &GenFileBlock| (block.label.clone(), block.origin.clone()),
    )?;

    let mut ctx = Context::new();
    ctx.set_namespace("terramate", stack.metadata_value());
    ctx.set_namespace("global", globals.value());

    let mut res = StackFiles::default();
    for (label, block) in blocks {
        let origin = project::prj_abs_path(root, &block.origin);

        let condition = super::eval_condition(&ctx, block.condition.as_ref())
            .map_err(|err| block_err(&block, &label, err))?;
        if !condition {
            res.files.insert(
                label,
                GenFile {
                    origin,
                    body: String::new(),
                    condition: false,
                },
            );
            continue;
        }

        let expr: hcl::Expression = block.content.clone().into();
        let value = ctx
            .eval(&expr)
            .map_err(|err| block_err(&block, &label, err))?;

        let body = match value {
            hcl::Value::String(s) => s,
            // a null body means this block generates nothing here
            hcl::Value::Null => String::new(),
            other => {
                return Err(block_err(
                    &block,
                    &label,
                    Error::new(
                        ErrorKind::Eval,
                        format!("content must be a string or null, got `{other}`"),
                    ),
                ));
            }
        };

        res.files.insert(
            label,
            GenFile {
                origin,
                body,
                condition: true,
            },
        );
    }

    Ok(res)
}

fn block_err(block: &GenFileBlock, label: &str, err: Error) -> ErrorList {
    let err = Error::new(
        err.kind(),
        format!("generate_file {label:?}: {}", err.message()),
    );
    let err = match &block.range {
        Some(range) => err.at(range.clone()),
        None => err,
    };
    err.into()
}
