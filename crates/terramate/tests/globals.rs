//! hierarchical globals resolution against real project trees

mod common;

use common::Project;
use hcl::Value;
use pretty_assertions::assert_eq;
use terramate::error::ErrorKind;
use terramate::{globals, stack};

fn load(project: &Project, stack_dir: &str) -> globals::Globals {
    let stack = stack::load(project.root(), &project.path(stack_dir)).expect("stack must load");
    globals::load(project.root(), &stack).expect("globals must resolve")
}

#[test]
fn deeper_definitions_shadow_ancestors() {
    let project = Project::new();
    project
        .file("globals.tm", "globals {\n  env = \"dev\"\n  region = \"eu\"\n}\n")
        .file("stacks/dev/stack.tm", "stack {}\n")
        .file(
            "stacks/prod/stack.tm",
            "stack {}\n\nglobals {\n  env = \"prod\"\n}\n",
        );

    let dev = load(&project, "stacks/dev");
    assert_eq!(dev.get("env"), Some(&Value::from("dev")));
    assert_eq!(dev.get("region"), Some(&Value::from("eu")));

    let prod = load(&project, "stacks/prod");
    assert_eq!(prod.get("env"), Some(&Value::from("prod")));
    assert_eq!(prod.get("region"), Some(&Value::from("eu")));
}

#[test]
fn globals_reference_each_other_across_levels() {
    let project = Project::new();
    project
        .file("globals.tm", "globals {\n  base = 2\n}\n")
        .file(
            "stack/stack.tm",
            "stack {}\n\nglobals {\n  a = global.b + 1\n  b = global.base * 10\n}\n",
        );

    let globals = load(&project, "stack");
    assert_eq!(globals.get("b"), Some(&Value::from(20)));
    assert_eq!(globals.get("a"), Some(&Value::from(21)));
}

#[test]
fn metadata_is_visible_to_globals() {
    let project = Project::new();
    project.file(
        "stack/stack.tm",
        "stack {\n  name = \"net\"\n}\n\nglobals {\n  where = terramate.path\n}\n",
    );

    let globals = load(&project, "stack");
    assert_eq!(globals.get("where"), Some(&Value::from("/stack")));
}

#[test]
fn same_level_redefinition_is_rejected() {
    let project = Project::new();
    project
        .file("stack/stack.tm", "stack {}\n")
        .file("stack/a.tm", "globals {\n  x = 1\n}\n")
        .file("stack/b.tm", "globals {\n  x = 2\n}\n");

    let stack = stack::load(project.root(), &project.path("stack"));
    let err = stack.expect_err("must fail");
    assert!(err.has_kind(ErrorKind::GlobalRedefined));
}

#[test]
fn unresolvable_globals_report_the_pending_set() {
    let project = Project::new();
    project.file(
        "stack/stack.tm",
        "stack {}\n\nglobals {\n  a = global.a\n}\n",
    );

    let stack = stack::load(project.root(), &project.path("stack")).expect("stack must load");
    let err = globals::load(project.root(), &stack).expect_err("must fail");
    assert!(err.has_kind(ErrorKind::GlobalEval));
    assert!(err
        .iter()
        .any(|e| e.message().contains("unable to evaluate 1 globals")));
}

#[test]
fn tm_functions_are_available_in_globals() {
    let project = Project::new();
    project.file(
        "stack/stack.tm",
        "stack {}\n\nglobals {\n  upper = tm_upper(\"abc\")\n  first = tm_try(terramate.missing, \"fallback\")\n}\n",
    );

    let globals = load(&project, "stack");
    assert_eq!(globals.get("upper"), Some(&Value::from("ABC")));
    assert_eq!(globals.get("first"), Some(&Value::from("fallback")));
}

#[test]
fn reference_to_undefined_global_is_fatal() {
    let project = Project::new();
    project.file(
        "stack/stack.tm",
        "stack {}\n\nglobals {\n  a = tm_try(global.missing, \"fallback\")\n}\n",
    );

    let stack = stack::load(project.root(), &project.path("stack")).expect("stack must load");
    let err = globals::load(project.root(), &stack).expect_err("must fail");
    assert!(err.iter().any(|e| e.message().contains("undefined global")));
}
