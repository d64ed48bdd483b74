//! code generation
//!
//! Walks every stack under a working directory, evaluates the
//! `generate_hcl` and `generate_file` blocks visible to each stack and
//! syncs the stack directory with the outcome: new files are created,
//! stale ones rewritten, files whose generator vanished (or turned
//! conditional) are deleted. The result is a [Report]; one failing stack
//! never aborts the others.
//!
//! Generated HCL files open with a fixed header marking them as
//! Terramate-owned. That header is how previously generated files are
//! recognized on later runs, and what protects manually written files from
//! being overwritten.

pub mod genfile;
pub mod genhcl;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::eval::Context;
use crate::globals;
use crate::project;
use crate::stack::{self, Stack};

/// Current header of generated HCL files.
pub const HEADER: &str = "// TERRAMATE: GENERATED AUTOMATICALLY DO NOT EDIT";

/// Legacy header, still recognized, never written.
pub const HEADER_V0: &str = "// GENERATED BY TERRAMATE: DO NOT EDIT";

/// Result of one code generation run.
#[derive(Debug, Default)]
pub struct Report {
    /// Failure before any stack was processed.
    pub bootstrap_err: Option<ErrorList>,
    pub stacks: Vec<StackReport>,
}

/// Per-stack slice of the report. Filenames are relative to the stack
/// directory and sorted lexicographically.
#[derive(Debug)]
pub struct StackReport {
    /// Project-absolute stack path.
    pub path: PathBuf,
    pub created: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub error: Option<ErrorList>,
}

impl Report {
    /// Tells if the run neither touched a file nor failed.
    pub fn is_empty(&self) -> bool {
        self.bootstrap_err.is_none()
            && self.stacks.iter().all(|entry| {
                entry.created.is_empty()
                    && entry.changed.is_empty()
                    && entry.deleted.is_empty()
                    && entry.error.is_none()
            })
    }

    pub fn has_failures(&self) -> bool {
        self.bootstrap_err.is_some() || self.stacks.iter().any(|entry| entry.error.is_some())
    }

    /// Stacks that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &ErrorList)> {
        self.stacks
            .iter()
            .filter_map(|entry| entry.error.as_ref().map(|err| (entry.path.as_path(), err)))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.bootstrap_err {
            return write!(f, "code generation failed: {err}");
        }
        if self.is_empty() {
            return f.write_str("Nothing to do, generated code is up to date");
        }

        f.write_str("Code generation report\n")?;
        for entry in &self.stacks {
            if entry.created.is_empty()
                && entry.changed.is_empty()
                && entry.deleted.is_empty()
                && entry.error.is_none()
            {
                continue;
            }
            write!(f, "\n/{}:\n", entry.path.display().to_string().trim_start_matches('/'))?;
            for name in &entry.created {
                writeln!(f, "\tcreated: {name}")?;
            }
            for name in &entry.changed {
                writeln!(f, "\tchanged: {name}")?;
            }
            for name in &entry.deleted {
                writeln!(f, "\tdeleted: {name}")?;
            }
            if let Some(err) = &entry.error {
                for err in err.iter() {
                    writeln!(f, "\terror: {err}")?;
                }
            }
        }
        Ok(())
    }
}

/// Generates code for every stack inside `working_dir`, walking the whole
/// project for configuration. `working_dir` must be `root` or a directory
/// inside it.
pub fn do_generate(root: &Path, working_dir: &Path) -> Report {
    tracing::debug!(root = %root.display(), dir = %working_dir.display(), "generating code");

    let mut report = Report::default();

    let stacks = match stack::list(root) {
        Ok(stacks) => stacks,
        Err(err) => {
            report.bootstrap_err = Some(err);
            return report;
        }
    };

    for stack in stacks {
        if !project::is_inside(working_dir, stack.host_path()) {
            continue;
        }

        let mut entry = StackReport {
            path: stack.path().to_path_buf(),
            created: Vec::new(),
            changed: Vec::new(),
            deleted: Vec::new(),
            error: None,
        };

        match generate_stack(root, &stack) {
            Ok(outcome) => {
                entry.created = outcome.created;
                entry.changed = outcome.changed;
                entry.deleted = outcome.deleted;
            }
            Err(err) => entry.error = Some(err),
        }

        report.stacks.push(entry);
    }

    report.stacks.sort_by(|a, b| a.path.cmp(&b.path));
    report
}

#[derive(Default)]
struct Outcome {
    created: Vec<String>,
    changed: Vec<String>,
    deleted: Vec<String>,
}

struct PlannedFile {
    content: String,
    /// Header-bearing files can be recognized later as Terramate-owned.
    header: bool,
}

fn generate_stack(root: &Path, stack: &Stack) -> Result<Outcome, ErrorList> {
    let globals = globals::load(root, stack)
        .map_err(|err| ErrorList::from(Error::wrap(ErrorKind::LoadingGlobals, err)))?;

    let hcls = genhcl::load(root, stack, &globals)?;
    let files = genfile::load(root, stack, &globals)?;

    // filename validation covers every enabled generator, including the
    // ones that produce no content this run
    let mut errs = ErrorList::new();
    let mut seen = BTreeSet::new();
    let enabled = hcls
        .iter()
        .filter(|(_, hcl)| hcl.condition())
        .map(|(name, _)| name)
        .chain(
            files
                .iter()
                .filter(|(_, file)| file.condition())
                .map(|(name, _)| name),
        );
    for name in enabled {
        if name.contains('/') {
            errs.push(Error::new(
                ErrorKind::InvalidFilePath,
                format!("filename {name:?} contains a path separator"),
            ));
            continue;
        }
        if !seen.insert(name.clone()) {
            errs.push(Error::new(
                ErrorKind::ConflictingConfig,
                format!("two generators produce the same file {name:?}"),
            ));
        }
    }
    errs.into_result()?;

    let mut plan: BTreeMap<String, PlannedFile> = BTreeMap::new();
    for (name, hcl) in hcls.iter() {
        if !hcl.condition() || hcl.body().is_empty() {
            continue;
        }
        plan.insert(
            name.clone(),
            PlannedFile {
                content: format!(
                    "{HEADER}\n// TERRAMATE: originated from generate_hcl block on {}\n\n{}",
                    hcl.origin().display(),
                    hcl.body()
                ),
                header: true,
            },
        );
    }
    for (name, file) in files.iter() {
        if !file.condition() || file.body().is_empty() {
            continue;
        }
        plan.insert(
            name.clone(),
            PlannedFile {
                content: file.body().to_string(),
                header: false,
            },
        );
    }

    let stack_dir = stack.host_path();
    let old = list_generated_files(stack_dir)?;
    let mut leftover: BTreeSet<String> = old.keys().cloned().collect();

    let mut outcome = Outcome::default();

    for (name, planned) in &plan {
        let target = stack_dir.join(name);
        match old.get(name) {
            Some(existing) if *existing == planned.content => {
                // up to date
                leftover.remove(name);
            }
            Some(_) => {
                write_file(&target, &planned.content)?;
                leftover.remove(name);
                outcome.changed.push(name.clone());
            }
            None => {
                if target.exists() {
                    if planned.header {
                        return Err(Error::new(
                            ErrorKind::ManualCodeExists,
                            format!("found manually defined code at {target:?}"),
                        )
                        .into());
                    }
                    // headerless outputs cannot be recognized as
                    // generated; identical content counts as up to date
                    let existing = std::fs::read_to_string(&target).map_err(Error::from)?;
                    if existing == planned.content {
                        continue;
                    }
                    return Err(Error::new(
                        ErrorKind::ManualCodeExists,
                        format!("refusing to overwrite {target:?}"),
                    )
                    .into());
                }
                write_file(&target, &planned.content)?;
                outcome.created.push(name.clone());
            }
        }
    }

    for name in leftover {
        std::fs::remove_file(stack_dir.join(&name)).map_err(Error::from)?;
        outcome.deleted.push(name);
    }

    outcome.created.sort();
    outcome.changed.sort();
    outcome.deleted.sort();
    Ok(outcome)
}

fn write_file(target: &Path, content: &str) -> Result<(), ErrorList> {
    tracing::trace!(file = %target.display(), "writing generated file");
    std::fs::write(target, content).map_err(|err| {
        ErrorList::from(Error::new(
            ErrorKind::Io,
            format!("writing generated file {target:?}: {err}"),
        ))
    })
}

/// Reads the files of a stack directory that carry a Terramate header,
/// mapping filename to content.
fn list_generated_files(dir: &Path) -> Result<BTreeMap<String, String>, ErrorList> {
    let mut generated = BTreeMap::new();

    let entries = std::fs::read_dir(dir).map_err(|err| {
        ErrorList::from(Error::new(
            ErrorKind::Io,
            format!("listing generated files of {dir:?}: {err}"),
        ))
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| ErrorList::from(Error::from(err)))?;
        if !entry
            .file_type()
            .map_err(|err| ErrorList::from(Error::from(err)))?
            .is_file()
        {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            // non-utf8 files are never Terramate-generated
            Err(_) => continue,
        };
        if has_terramate_header(&content) {
            generated.insert(name, content);
        }
    }

    Ok(generated)
}

fn has_terramate_header(content: &str) -> bool {
    content.starts_with(HEADER) || content.starts_with(HEADER_V0)
}

/// Hierarchical collection of generate blocks: walks from the stack
/// directory up to the root; block labels must be unique per level and
/// across the whole ancestor chain.
fn load_chain<B, E, K>(
    root: &Path,
    stack_dir: &Path,
    extract: E,
    key: K,
) -> Result<indexmap::IndexMap<String, B>, ErrorList>
where
    E: Fn(&config::Config) -> Vec<B>,
    K: Fn(&B) -> (String, PathBuf),
{
    let mut result: indexmap::IndexMap<String, B> = indexmap::IndexMap::new();
    let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut dir = stack_dir.to_path_buf();

    loop {
        let cfg = config::load_dir(root, &dir)?;
        let mut level_labels = BTreeSet::new();

        for block in extract(&cfg) {
            let (label, origin) = key(&block);

            if !level_labels.insert(label.clone()) {
                return Err(Error::new(
                    ErrorKind::Parsing,
                    format!("found two blocks with same label {label:?}"),
                )
                .into());
            }
            if let Some(existing) = origins.get(&label) {
                return Err(Error::new(
                    ErrorKind::MultiLevelConflict,
                    format!(
                        "found label {label:?} at {:?} and {:?}",
                        origin, existing
                    ),
                )
                .into());
            }

            origins.insert(label.clone(), origin);
            result.insert(label, block);
        }

        if dir == root {
            break;
        }
        match project::parent_dir(&dir) {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(result)
}

/// Evaluates an optional `condition` attribute, defaulting to true.
fn eval_condition(
    ctx: &Context,
    condition: Option<&hcl_edit::expr::Expression>,
) -> Result<bool, Error> {
    let Some(condition) = condition else {
        return Ok(true);
    };
    let expr: hcl::Expression = condition.clone().into();
    match ctx.eval(&expr)? {
        hcl::Value::Bool(b) => Ok(b),
        other => Err(Error::new(
            ErrorKind::Eval,
            format!("condition must be a boolean, got `{other}`"),
        )),
    }
}
