//! stack execution order
//!
//! The `after` and `before` sets of every stack form a dependency graph.
//! Each stack gets its own order tree built by following `after` edges; the
//! visited set is copied per branch so a diamond (two paths reaching the
//! same stack) is not mistaken for a cycle. Cycles are detected in every
//! walk and rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, ErrorList};
use crate::project;
use crate::stack::{self, Stack};

/// Order tree rooted at one stack: the stacks it must run after.
#[derive(Debug)]
pub struct OrderTree {
    pub stack: Stack,
    pub order: Vec<OrderTree>,
    pub cycle: bool,
}

/// Computes the execution order for the given stacks. With multiple valid
/// orders the lexicographically smallest stack path runs first.
pub fn run_order(root: &Path, stacks: Vec<Stack>) -> Result<Vec<Stack>, ErrorList> {
    let after_edges = before_inverted_edges(root, &stacks)?;

    let mut trees = BTreeMap::new();
    for stack in &stacks {
        let tree = build_order_tree(root, stack, &after_edges)?;
        check_cycle(&tree)?;
        trees.insert(stack.path().to_path_buf(), tree);
    }

    let mut remove = Vec::new();
    for (key1, tree1) in &trees {
        for (key2, tree2) in &trees {
            if key1 != key2 && is_subtree(tree1, tree2) {
                remove.push(key1.clone());
            }
        }
    }
    for key in remove {
        trees.remove(&key);
    }

    let mut order = Vec::new();
    let mut visited = BTreeSet::new();
    for tree in trees.values() {
        walk_order_tree(tree, &mut |stack: &Stack| {
            if visited.insert(stack.path().to_path_buf()) {
                order.push(stack.clone());
            }
        });
    }

    Ok(order)
}

/// Builds the order tree of one stack by loading every stack its `after`
/// entries point at.
pub fn build_order_tree(
    root: &Path,
    stack: &Stack,
    extra_after: &BTreeMap<PathBuf, Vec<PathBuf>>,
) -> Result<OrderTree, ErrorList> {
    let mut visited = BTreeSet::new();
    visited.insert(stack.path().to_path_buf());
    build_tree(root, stack, extra_after, visited)
}

fn build_tree(
    root: &Path,
    stack: &Stack,
    extra_after: &BTreeMap<PathBuf, Vec<PathBuf>>,
    visited: BTreeSet<PathBuf>,
) -> Result<OrderTree, ErrorList> {
    let mut tree = OrderTree {
        stack: stack.clone(),
        order: Vec::new(),
        cycle: false,
    };

    let mut after_dirs = Vec::new();
    for entry in stack.after() {
        after_dirs.push(resolve_ref(root, stack, entry)?);
    }
    if let Some(extra) = extra_after.get(stack.path()) {
        after_dirs.extend(extra.iter().cloned());
    }
    after_dirs.sort();
    after_dirs.dedup();

    for dir in after_dirs {
        let after_stack = stack::load(root, &dir)?;

        if visited.contains(after_stack.path()) {
            // cycle detected, stop recursing on this branch
            tree.order.push(OrderTree {
                stack: after_stack,
                order: Vec::new(),
                cycle: true,
            });
            continue;
        }

        // visited is copied down each branch, not across siblings
        let mut branch_visited = visited.clone();
        branch_visited.insert(after_stack.path().to_path_buf());
        tree.order
            .push(build_tree(root, &after_stack, extra_after, branch_visited)?);
    }

    Ok(tree)
}

/// Inverts `before` declarations into `after` edges on their targets.
fn before_inverted_edges(
    root: &Path,
    stacks: &[Stack],
) -> Result<BTreeMap<PathBuf, Vec<PathBuf>>, ErrorList> {
    let mut edges: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for stack in stacks {
        for entry in stack.before() {
            let target_dir = resolve_ref(root, stack, entry)?;
            let target = project::prj_abs_path(root, &target_dir);
            edges
                .entry(target)
                .or_default()
                .push(stack.host_path().to_path_buf());
        }
    }
    Ok(edges)
}

/// Resolves an `after`/`before` entry to a host-absolute stack directory.
/// Entries starting with `/` are project-absolute, anything else is
/// relative to the stack directory.
fn resolve_ref(root: &Path, stack: &Stack, entry: &str) -> Result<PathBuf, ErrorList> {
    let path = Path::new(entry);
    let dir = if path.is_absolute() {
        let rel = path.strip_prefix("/").unwrap_or(path);
        root.join(rel)
    } else {
        stack.host_path().join(path)
    };
    let dir = project::normalize(&dir);

    if !project::is_inside(root, &dir) {
        return Err(Error::new(
            ErrorKind::InvalidStackDir,
            format!(
                "stack {} references {entry:?} outside the project root",
                stack.path().display()
            ),
        )
        .into());
    }
    Ok(dir)
}

fn walk_order_tree(tree: &OrderTree, run: &mut dyn FnMut(&Stack)) {
    for child in &tree.order {
        walk_order_tree(child, run);
    }
    run(&tree.stack);
}

fn is_subtree(t1: &OrderTree, t2: &OrderTree) -> bool {
    if t1.stack.path() == t2.stack.path() {
        return true;
    }
    t2.order.iter().any(|child| is_subtree(t1, child))
}

fn check_cycle(tree: &OrderTree) -> Result<(), ErrorList> {
    for subtree in &tree.order {
        if subtree.cycle {
            return Err(Error::new(
                ErrorKind::ConflictingConfig,
                format!(
                    "cycle detected on run order: {} depends on itself",
                    subtree.stack.path().display()
                ),
            )
            .into());
        }
        check_cycle(subtree)?;
    }
    Ok(())
}
