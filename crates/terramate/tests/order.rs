//! stack execution order

mod common;

use common::Project;
use pretty_assertions::assert_eq;
use terramate::error::ErrorKind;
use terramate::{order, stack};

fn paths(stacks: &[stack::Stack]) -> Vec<String> {
    stacks
        .iter()
        .map(|s| s.path().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn after_orders_dependencies_first() {
    let project = Project::new();
    project
        .file("base/stack.tm", "stack {}\n")
        .file(
            "app/stack.tm",
            "stack {\n  after = [\"/base\"]\n}\n",
        );

    let stacks = stack::list(project.root()).expect("stacks must list");
    let ordered = order::run_order(project.root(), stacks).expect("order must resolve");
    assert_eq!(paths(&ordered), vec!["/base".to_string(), "/app".to_string()]);
}

#[test]
fn before_inverts_into_the_target() {
    let project = Project::new();
    project
        .file("first/stack.tm", "stack {\n  before = [\"/second\"]\n}\n")
        .file("second/stack.tm", "stack {}\n");

    let stacks = stack::list(project.root()).expect("stacks must list");
    let ordered = order::run_order(project.root(), stacks).expect("order must resolve");
    assert_eq!(
        paths(&ordered),
        vec!["/first".to_string(), "/second".to_string()]
    );
}

#[test]
fn independent_stacks_run_in_path_order() {
    let project = Project::new();
    project
        .file("c/stack.tm", "stack {}\n")
        .file("a/stack.tm", "stack {}\n")
        .file("b/stack.tm", "stack {}\n");

    let stacks = stack::list(project.root()).expect("stacks must list");
    let ordered = order::run_order(project.root(), stacks).expect("order must resolve");
    assert_eq!(
        paths(&ordered),
        vec!["/a".to_string(), "/b".to_string(), "/c".to_string()]
    );
}

#[test]
fn diamond_dependencies_are_not_cycles() {
    let project = Project::new();
    project
        .file("base/stack.tm", "stack {}\n")
        .file("left/stack.tm", "stack {\n  after = [\"/base\"]\n}\n")
        .file("right/stack.tm", "stack {\n  after = [\"/base\"]\n}\n")
        .file(
            "top/stack.tm",
            "stack {\n  after = [\"/left\", \"/right\"]\n}\n",
        );

    let stacks = stack::list(project.root()).expect("stacks must list");
    let ordered = order::run_order(project.root(), stacks).expect("order must resolve");

    let ordered = paths(&ordered);
    let pos = |p: &str| ordered.iter().position(|x| x == p).expect("stack in order");
    assert!(pos("/base") < pos("/left"));
    assert!(pos("/base") < pos("/right"));
    assert!(pos("/left") < pos("/top"));
    assert!(pos("/right") < pos("/top"));
}

#[test]
fn cycles_are_rejected() {
    let project = Project::new();
    project
        .file("a/stack.tm", "stack {\n  after = [\"/b\"]\n}\n")
        .file("b/stack.tm", "stack {\n  after = [\"/a\"]\n}\n");

    let stacks = stack::list(project.root()).expect("stacks must list");
    let err = order::run_order(project.root(), stacks).expect_err("must fail");
    assert!(err.has_kind(ErrorKind::ConflictingConfig));
}

#[test]
fn references_outside_the_root_are_rejected() {
    let project = Project::new();
    project.file("a/stack.tm", "stack {\n  after = [\"../../elsewhere\"]\n}\n");

    let stacks = stack::list(project.root()).expect("stacks must list");
    let err = order::run_order(project.root(), stacks).expect_err("must fail");
    assert!(err.has_kind(ErrorKind::InvalidStackDir));
}

#[test]
fn after_referencing_a_non_stack_dir_fails() {
    let project = Project::new();
    project
        .dir("not-a-stack")
        .file("a/stack.tm", "stack {\n  after = [\"/not-a-stack\"]\n}\n");

    let stacks = stack::list(project.root()).expect("stacks must list");
    let err = order::run_order(project.root(), stacks).expect_err("must fail");
    assert!(err.has_kind(ErrorKind::InvalidStackDir));
}
