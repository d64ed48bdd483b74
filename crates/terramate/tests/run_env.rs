//! run environment evaluation

mod common;

use common::Project;
use pretty_assertions::assert_eq;
use terramate::{run, stack};

#[test]
fn no_env_config_yields_nothing() {
    let project = Project::new();
    project.file("stack/stack.tm", "stack {}\n");

    let stack = stack::load(project.root(), &project.path("stack")).expect("stack must load");
    let env = run::load_env(project.root(), &stack).expect("env must load");
    assert_eq!(env, Vec::<String>::new());
}

#[test]
fn env_evaluates_with_all_namespaces() {
    std::env::set_var("TERRAMATE_TEST_TOKEN", "secret");

    let project = Project::new();
    project
        .file("globals.tm", "globals {\n  env = \"dev\"\n}\n")
        .file(
            "stack/stack.tm",
            concat!(
                "stack {}\n\n",
                "terramate {\n  config {\n    run {\n      env {\n",
                "        DEPLOY_ENV = global.env\n",
                "        STACK_PATH = terramate.path\n",
                "        TOKEN      = env.TERRAMATE_TEST_TOKEN\n",
                "      }\n    }\n  }\n}\n",
            ),
        );

    let stack = stack::load(project.root(), &project.path("stack")).expect("stack must load");
    let env = run::load_env(project.root(), &stack).expect("env must load");
    assert_eq!(
        env,
        vec![
            "DEPLOY_ENV=dev".to_string(),
            "STACK_PATH=/stack".to_string(),
            "TOKEN=secret".to_string(),
        ]
    );
}

#[test]
fn nearest_definition_wins() {
    let project = Project::new();
    project
        .file(
            "cfg.tm",
            "terramate {\n  config {\n    run {\n      env {\n        WHO = \"root\"\n      }\n    }\n  }\n}\n",
        )
        .file(
            "stack/stack.tm",
            concat!(
                "stack {}\n\n",
                "terramate {\n  config {\n    run {\n      env {\n",
                "        WHO = \"stack\"\n",
                "      }\n    }\n  }\n}\n",
            ),
        );

    let stack = stack::load(project.root(), &project.path("stack")).expect("stack must load");
    let env = run::load_env(project.root(), &stack).expect("env must load");
    assert_eq!(env, vec!["WHO=stack".to_string()]);
}
