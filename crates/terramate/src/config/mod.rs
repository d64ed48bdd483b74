//! directory configuration: parsing, merging and schema
//!
//! A directory's configuration spans every `.tm` / `.tm.hcl` file directly
//! inside it. [load_dir] parses all of them (lexicographic order), merges
//! top-level attributes and mergeable blocks, resolves `import` blocks and
//! validates the resulting schema into a [Config].

mod merge;
mod parser;
mod schema;

pub use merge::{Attribute, MergedBlock};
pub use parser::DirParser;

use std::path::{Path, PathBuf};

use crate::error::{ErrorList, SourceRange};

/// Parsed and validated configuration of a single directory.
#[derive(Debug, Default)]
pub struct Config {
    pub terramate: Option<Terramate>,
    pub stack: Option<Stack>,

    /// Merged `globals` attributes of this directory, still unevaluated.
    pub globals: indexmap::IndexMap<String, Attribute>,

    pub generate_hcls: Vec<GenHclBlock>,
    pub generate_files: Vec<GenFileBlock>,

    absdir: PathBuf,
}

impl Config {
    pub(crate) fn empty(absdir: PathBuf) -> Config {
        Config {
            absdir,
            ..Config::default()
        }
    }

    /// Absolute path of the configuration directory.
    pub fn abs_dir(&self) -> &Path {
        &self.absdir
    }

    pub fn is_empty(&self) -> bool {
        self.terramate.is_none() && self.stack.is_none()
    }

    /// Tells if a `terramate.config.run.env` block is defined.
    pub fn has_run_env(&self) -> bool {
        self.run_env().is_some()
    }

    pub fn run_env(&self) -> Option<&RunEnv> {
        self.terramate
            .as_ref()
            .and_then(|tm| tm.config.as_ref())
            .and_then(|cfg| cfg.run.as_ref())
            .and_then(|run| run.env.as_ref())
    }
}

/// The merged `terramate` block.
#[derive(Debug, Default)]
pub struct Terramate {
    /// Version constraint required by this project.
    pub required_version: Option<String>,
    pub config: Option<RootConfig>,
}

/// The `terramate.config` block.
#[derive(Debug, Default)]
pub struct RootConfig {
    pub git: Option<GitConfig>,
    pub run: Option<RunConfig>,
}

/// The `terramate.config.git` block.
#[derive(Debug, Default)]
pub struct GitConfig {
    pub default_branch: Option<String>,
    pub default_remote: Option<String>,
    pub default_branch_base_ref: Option<String>,
    pub disable_check_untracked: bool,
    pub disable_check_uncommitted: bool,
    pub disable_check_remote: bool,
}

/// The `terramate.config.run` block.
#[derive(Debug, Default)]
pub struct RunConfig {
    pub env: Option<RunEnv>,
}

/// The `terramate.config.run.env` block: free-form attribute definitions
/// evaluated only when the run environment is requested.
#[derive(Debug, Default)]
pub struct RunEnv {
    pub attributes: indexmap::IndexMap<String, Attribute>,
}

/// The parsed `stack` block.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    /// Optional stack identifier, restricted to `[A-Za-z0-9_-]{1,64}`.
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,

    // ordered, deduplicated string sets
    pub after: Vec<String>,
    pub before: Vec<String>,
    pub wants: Vec<String>,
    pub watch: Vec<String>,
}

/// A parsed `generate_hcl` block.
#[derive(Debug, Clone)]
pub struct GenHclBlock {
    /// Host-absolute path of the file defining the block.
    pub origin: PathBuf,
    pub label: String,
    /// Body of the `content` sub-block, untouched.
    pub content: hcl_edit::structure::Body,
    pub condition: Option<hcl_edit::expr::Expression>,
    pub range: Option<SourceRange>,
}

/// A parsed `generate_file` block.
#[derive(Debug, Clone)]
pub struct GenFileBlock {
    pub origin: PathBuf,
    pub label: String,
    pub content: hcl_edit::expr::Expression,
    pub condition: Option<hcl_edit::expr::Expression>,
    pub range: Option<SourceRange>,
}

/// Parses and validates the configuration of `dir` inside the project
/// rooted at `root`. Does not recurse into child directories.
pub fn load_dir(root: &Path, dir: &Path) -> Result<Config, ErrorList> {
    tracing::trace!(dir = %dir.display(), "parsing configuration files");

    let mut parser = DirParser::new(root, dir).map_err(ErrorList::from)?;
    parser.add_dir().map_err(ErrorList::from)?;
    parser.parse()?;
    schema::validate(parser)
}
