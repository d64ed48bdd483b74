//! stack representation and discovery
//!
//! A stack is any directory whose configuration declares a `stack` block.
//! There is no on-disk marker beyond that block.

use std::path::{Path, PathBuf};

use hcl::value::Map;
use hcl::Value;

use crate::config;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::project;

/// A loaded stack.
#[derive(Debug, Clone)]
pub struct Stack {
    /// Filesystem absolute path of the stack.
    hostpath: PathBuf,

    /// Project-absolute path of the stack.
    path: PathBuf,

    id: Option<String>,
    name: String,
    description: String,

    after: Vec<String>,
    before: Vec<String>,
    wants: Vec<String>,
    watch: Vec<String>,
}

impl Stack {
    /// Builds a stack from a parsed configuration holding a `stack` block.
    pub(crate) fn new(root: &Path, cfg: &config::Config, block: &config::Stack) -> Stack {
        let hostpath = cfg.abs_dir().to_path_buf();
        let name = block.name.clone().unwrap_or_else(|| {
            hostpath
                .file_name()
                .map(|base| base.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".to_string())
        });

        Stack {
            path: project::prj_abs_path(root, &hostpath),
            hostpath,
            id: block.id.clone(),
            name,
            description: block.description.clone().unwrap_or_default(),
            after: block.after.clone(),
            before: block.before.clone(),
            wants: block.wants.clone(),
            watch: block.watch.clone(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Project-absolute path of the stack.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Filesystem absolute path of the stack.
    pub fn host_path(&self) -> &Path {
        &self.hostpath
    }

    pub fn after(&self) -> &[String] {
        &self.after
    }

    pub fn before(&self) -> &[String] {
        &self.before
    }

    pub fn wants(&self) -> &[String] {
        &self.wants
    }

    pub fn watch(&self) -> &[String] {
        &self.watch
    }

    /// Stack metadata exposed as the `terramate` namespace.
    pub fn metadata_value(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("name".to_string(), Value::from(self.name.clone()));
        meta.insert(
            "path".to_string(),
            Value::from(self.path.to_string_lossy().into_owned()),
        );
        meta.insert(
            "description".to_string(),
            Value::from(self.description.clone()),
        );
        Value::Object(meta)
    }
}

#[cfg(test)]
pub(crate) fn test_stack(root: &Path, dir: &Path) -> Stack {
    let hostpath = dir.to_path_buf();
    Stack {
        path: project::prj_abs_path(root, &hostpath),
        name: hostpath
            .file_name()
            .map(|base| base.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string()),
        hostpath,
        id: None,
        description: String::new(),
        after: Vec::new(),
        before: Vec::new(),
        wants: Vec::new(),
        watch: Vec::new(),
    }
}

impl std::fmt::Display for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Loads the stack defined at `dir`, failing if the directory defines none.
pub fn load(root: &Path, dir: &Path) -> Result<Stack, ErrorList> {
    match try_load(root, dir)? {
        Some(stack) => Ok(stack),
        None => Err(Error::new(
            ErrorKind::InvalidStackDir,
            format!("directory {dir:?} has no stack block"),
        )
        .into()),
    }
}

/// Loads the stack defined at `dir`, if any.
pub fn try_load(root: &Path, dir: &Path) -> Result<Option<Stack>, ErrorList> {
    if !project::is_inside(root, dir) {
        return Err(Error::new(
            ErrorKind::InvalidStackDir,
            format!("stack directory {dir:?} is outside project root {root:?}"),
        )
        .into());
    }

    let cfg = config::load_dir(root, dir)?;
    match &cfg.stack {
        Some(block) => Ok(Some(Stack::new(root, &cfg, block))),
        None => Ok(None),
    }
}

/// Lists every stack under `root`, ordered by project path. Directories
/// starting with `.` are skipped.
pub fn list(root: &Path) -> Result<Vec<Stack>, ErrorList> {
    let mut stacks = Vec::new();
    collect(root, root, &mut stacks)?;
    stacks.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(stacks)
}

fn collect(root: &Path, dir: &Path, stacks: &mut Vec<Stack>) -> Result<(), ErrorList> {
    if let Some(stack) = try_load(root, dir)? {
        tracing::trace!(stack = %stack, "stack found");
        stacks.push(stack);
    }

    let entries = std::fs::read_dir(dir).map_err(|err| {
        ErrorList::from(Error::new(
            ErrorKind::Io,
            format!("listing stacks under {dir:?}: {err}"),
        ))
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| ErrorList::from(Error::from(err)))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry
            .file_type()
            .map_err(|err| ErrorList::from(Error::from(err)))?
            .is_dir();
        if is_dir {
            collect(root, &entry.path(), stacks)?;
        }
    }

    Ok(())
}
