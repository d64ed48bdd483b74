//! schema validation of the merged directory configuration

use hcl::eval::Evaluate;

use crate::config::merge::{Attribute, MergedBlock};
use crate::config::parser::{DirParser, RawBlock};
use crate::config::{
    Config, GenFileBlock, GenHclBlock, GitConfig, RootConfig, RunConfig, RunEnv, Stack, Terramate,
};
use crate::error::{Error, ErrorKind, ErrorList};

/// Validates the merged parse state and produces the typed [Config].
pub(crate) fn validate(parser: DirParser) -> Result<Config, ErrorList> {
    let mut errs = ErrorList::new();
    let mut config = Config::empty(parser.dir().to_path_buf());

    for (name, attr) in &parser.merged_attrs {
        let mut err = Error::new(ErrorKind::Schema, format!("unrecognized attribute {name:?}"));
        if let Some(range) = &attr.range {
            err = err.at(range.clone());
        }
        errs.push(err);
    }

    let mut stack_block: Option<&RawBlock> = None;
    for raw in &parser.raw_blocks {
        match raw.block_type() {
            "stack" => {
                if stack_block.is_some() {
                    errs.push(schema_err(raw, "duplicated stack block"));
                    continue;
                }
                stack_block = Some(raw);
            }
            "generate_hcl" => match validate_generate_hcl(raw) {
                Ok(block) => config.generate_hcls.push(block),
                Err(list) => errs.merge(list),
            },
            "generate_file" => match validate_generate_file(raw) {
                Ok(block) => config.generate_files.push(block),
                Err(list) => errs.merge(list),
            },
            other => {
                errs.push(schema_err(raw, format!("unrecognized block {other:?}")));
            }
        }
    }

    if let Some(block) = parser.merged_blocks.get("terramate") {
        match parse_terramate_block(block) {
            Ok(terramate) => config.terramate = Some(terramate),
            Err(list) => errs.merge(list),
        }
    }

    if let Some(globals) = parser.merged_blocks.get("globals") {
        errs.merge_wrap(ErrorKind::Schema, globals.validate_sub_blocks(&[]));
        config.globals = globals.attributes.clone();
    }

    if let Some(raw) = stack_block {
        match parse_stack_block(raw) {
            Ok(stack) => config.stack = Some(stack),
            Err(list) => errs.merge(list),
        }
    }

    errs.into_result()?;
    Ok(config)
}

fn schema_err(raw: &RawBlock, msg: impl Into<String>) -> Error {
    let err = Error::new(ErrorKind::Schema, msg);
    match raw.range() {
        Some(range) => err.at(range),
        None => err,
    }
}

fn attr_err(attr: &Attribute, msg: impl Into<String>) -> Error {
    let err = Error::new(ErrorKind::Schema, msg);
    match &attr.range {
        Some(range) => err.at(range.clone()),
        None => err,
    }
}

/// Evaluates an attribute that must be a literal string.
fn eval_string(attr: &Attribute, what: &str) -> Result<String, Error> {
    match eval_literal(attr, what)? {
        hcl::Value::String(s) => Ok(s),
        other => Err(attr_err(
            attr,
            format!("{what} must be a string but given {}", type_name(&other)),
        )),
    }
}

/// Evaluates an attribute that must be a literal boolean.
fn eval_bool(attr: &Attribute, what: &str) -> Result<bool, Error> {
    match eval_literal(attr, what)? {
        hcl::Value::Bool(b) => Ok(b),
        other => Err(attr_err(
            attr,
            format!("{what} must be a boolean but given {}", type_name(&other)),
        )),
    }
}

fn eval_literal(attr: &Attribute, what: &str) -> Result<hcl::Value, Error> {
    let expr: hcl::Expression = attr.expr.clone().into();
    expr.evaluate(&hcl::eval::Context::new())
        .map_err(|err| attr_err(attr, format!("failed to evaluate {what}: {err}")))
}

pub(crate) fn type_name(value: &hcl::Value) -> &'static str {
    match value {
        hcl::Value::Null => "null",
        hcl::Value::Bool(_) => "bool",
        hcl::Value::Number(_) => "number",
        hcl::Value::String(_) => "string",
        hcl::Value::Array(_) => "list",
        hcl::Value::Object(_) => "object",
    }
}

fn parse_terramate_block(block: &MergedBlock) -> Result<Terramate, ErrorList> {
    let mut errs = ErrorList::new();
    let mut terramate = Terramate::default();

    for (name, attr) in &block.attributes {
        match name.as_str() {
            "required_version" => {
                if let Some(version) = errs.collect(eval_string(attr, "terramate.required_version"))
                {
                    terramate.required_version = Some(version);
                }
            }
            other => {
                errs.push(attr_err(
                    attr,
                    format!("unrecognized attribute terramate.{other}"),
                ));
            }
        }
    }

    errs.merge_wrap(ErrorKind::Schema, block.validate_sub_blocks(&["config"]));

    if let Some(config) = block.blocks.get("config") {
        match parse_root_config(config) {
            Ok(root) => terramate.config = Some(root),
            Err(list) => errs.merge(list),
        }
    }

    errs.into_result()?;
    Ok(terramate)
}

fn parse_root_config(block: &MergedBlock) -> Result<RootConfig, ErrorList> {
    let mut errs = ErrorList::new();
    let mut cfg = RootConfig::default();

    for (name, attr) in &block.attributes {
        errs.push(attr_err(
            attr,
            format!("unrecognized attribute terramate.config.{name}"),
        ));
    }

    errs.merge_wrap(ErrorKind::Schema, block.validate_sub_blocks(&["git", "run"]));

    if let Some(git) = block.blocks.get("git") {
        match parse_git_config(git) {
            Ok(parsed) => cfg.git = Some(parsed),
            Err(list) => errs.merge(list),
        }
    }

    if let Some(run) = block.blocks.get("run") {
        match parse_run_config(run) {
            Ok(parsed) => cfg.run = Some(parsed),
            Err(list) => errs.merge(list),
        }
    }

    errs.into_result()?;
    Ok(cfg)
}

fn parse_git_config(block: &MergedBlock) -> Result<GitConfig, ErrorList> {
    let mut errs = ErrorList::new();
    let mut git = GitConfig::default();

    errs.merge_wrap(ErrorKind::Schema, block.validate_sub_blocks(&[]));

    for (name, attr) in &block.attributes {
        let what = format!("terramate.config.git.{name}");
        match name.as_str() {
            "default_branch" => {
                git.default_branch = errs.collect(eval_string(attr, &what));
            }
            "default_remote" => {
                git.default_remote = errs.collect(eval_string(attr, &what));
            }
            "default_branch_base_ref" => {
                git.default_branch_base_ref = errs.collect(eval_string(attr, &what));
            }
            "disable_check_untracked" => {
                git.disable_check_untracked =
                    errs.collect(eval_bool(attr, &what)).unwrap_or_default();
            }
            "disable_check_uncommitted" => {
                git.disable_check_uncommitted =
                    errs.collect(eval_bool(attr, &what)).unwrap_or_default();
            }
            "disable_check_remote" => {
                git.disable_check_remote =
                    errs.collect(eval_bool(attr, &what)).unwrap_or_default();
            }
            _ => {
                errs.push(attr_err(attr, format!("unrecognized attribute {what}")));
            }
        }
    }

    errs.into_result()?;
    Ok(git)
}

fn parse_run_config(block: &MergedBlock) -> Result<RunConfig, ErrorList> {
    let mut errs = ErrorList::new();
    let mut run = RunConfig::default();

    for (name, attr) in &block.attributes {
        errs.push(attr_err(
            attr,
            format!("unrecognized attribute terramate.config.run.{name}"),
        ));
    }

    errs.merge_wrap(ErrorKind::Schema, block.validate_sub_blocks(&["env"]));

    if let Some(env) = block.blocks.get("env") {
        errs.merge_wrap(ErrorKind::Schema, env.validate_sub_blocks(&[]));
        run.env = Some(RunEnv {
            attributes: env.attributes.clone(),
        });
    }

    errs.into_result()?;
    Ok(run)
}

fn parse_stack_block(raw: &RawBlock) -> Result<Stack, ErrorList> {
    let mut errs = ErrorList::new();
    let mut stack = Stack::default();

    for sub in raw.block.body.blocks() {
        errs.push(schema_err(
            raw,
            format!("unrecognized block stack.{}", sub.ident.value().as_str()),
        ));
    }

    for attr in raw.block.body.attributes() {
        let name = attr.key.value().as_str();
        let attr = Attribute {
            origin: raw.origin.clone(),
            expr: attr.value.clone(),
            range: raw.range(),
        };
        let what = format!("stack.{name}");

        match name {
            "id" => {
                if let Some(id) = errs.collect(eval_string(&attr, &what)) {
                    if is_valid_stack_id(&id) {
                        stack.id = Some(id);
                    } else {
                        errs.push(attr_err(
                            &attr,
                            format!(
                                "stack ID {id:?} doesn't match \"^[A-Za-z0-9_-]{{1,64}}$\""
                            ),
                        ));
                    }
                }
            }
            "name" => stack.name = errs.collect(eval_string(&attr, &what)),
            "description" => stack.description = errs.collect(eval_string(&attr, &what)),
            "after" => {
                stack.after = assign_set(&attr, &what, &mut errs);
            }
            "before" => {
                stack.before = assign_set(&attr, &what, &mut errs);
            }
            "wants" => {
                stack.wants = assign_set(&attr, &what, &mut errs);
            }
            "watch" => {
                stack.watch = assign_set(&attr, &what, &mut errs);
            }
            other => {
                errs.push(attr_err(&attr, format!("unrecognized attribute stack.{other:?}")));
            }
        }
    }

    errs.into_result()?;
    Ok(stack)
}

fn is_valid_stack_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Evaluates a `set(string)` stack attribute: a list of unique strings,
/// returned sorted.
fn assign_set(attr: &Attribute, what: &str, errs: &mut ErrorList) -> Vec<String> {
    let value = match eval_literal(attr, what) {
        Ok(value) => value,
        Err(err) => {
            errs.push(err);
            return Vec::new();
        }
    };

    let items = match value {
        hcl::Value::Null => return Vec::new(),
        hcl::Value::Array(items) => items,
        other => {
            errs.push(attr_err(
                attr,
                format!(
                    "field {what} must be a set(string) but found a {}",
                    type_name(&other)
                ),
            ));
            return Vec::new();
        }
    };

    let mut values = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let hcl::Value::String(s) = item else {
            errs.push(attr_err(
                attr,
                format!(
                    "field {what} must be a set(string) but element {index} has type {}",
                    type_name(item)
                ),
            ));
            continue;
        };
        if values.contains(s) {
            errs.push(attr_err(
                attr,
                format!("duplicated entry {s:?} in field {what} of type set(string)"),
            ));
            continue;
        }
        values.push(s.clone());
    }

    values.sort();
    values
}

fn validate_generate_hcl(raw: &RawBlock) -> Result<GenHclBlock, ErrorList> {
    let mut errs = ErrorList::new();
    let block = &raw.block;

    let label = single_label(raw, "generate_hcl", &mut errs);

    let mut condition = None;
    for attr in block.body.attributes() {
        match attr.key.value().as_str() {
            "condition" => condition = Some(attr.value.clone()),
            other => errs.push(schema_err(
                raw,
                format!("unrecognized attribute generate_hcl.{other:?}"),
            )),
        }
    }

    let mut content = None;
    let mut nblocks = 0;
    for sub in block.body.blocks() {
        nblocks += 1;
        if sub.ident.value().as_str() != "content" {
            errs.push(schema_err(
                raw,
                format!("unrecognized block generate_hcl.{:?}", sub.ident.value().as_str()),
            ));
            continue;
        }
        if !sub.labels.is_empty() {
            errs.push(schema_err(raw, "generate_hcl content block must have no labels"));
            continue;
        }
        content = Some(sub.body.clone());
    }

    match nblocks {
        0 => errs.push(schema_err(raw, "generate_hcl must have one 'content' block")),
        1 => {}
        n => errs.push(schema_err(
            raw,
            format!("generate_hcl must have one block of type 'content', found {n} blocks"),
        )),
    }

    errs.into_result()?;
    Ok(GenHclBlock {
        origin: raw.origin.clone(),
        label: label.unwrap_or_default(),
        content: content.unwrap_or_default(),
        condition,
        range: raw.range(),
    })
}

fn validate_generate_file(raw: &RawBlock) -> Result<GenFileBlock, ErrorList> {
    let mut errs = ErrorList::new();
    let block = &raw.block;

    let label = single_label(raw, "generate_file", &mut errs);

    let mut condition = None;
    let mut content = None;
    for attr in block.body.attributes() {
        match attr.key.value().as_str() {
            "condition" => condition = Some(attr.value.clone()),
            "content" => content = Some(attr.value.clone()),
            other => errs.push(schema_err(
                raw,
                format!("unrecognized attribute generate_file.{other:?}"),
            )),
        }
    }

    for sub in block.body.blocks() {
        errs.push(schema_err(
            raw,
            format!("unrecognized block generate_file.{:?}", sub.ident.value().as_str()),
        ));
    }

    if content.is_none() {
        errs.push(schema_err(raw, "generate_file must declare a 'content' attribute"));
    }

    errs.into_result()?;
    Ok(GenFileBlock {
        origin: raw.origin.clone(),
        label: label.unwrap_or_default(),
        content: content.expect("checked above"),
        condition,
        range: raw.range(),
    })
}

fn single_label(raw: &RawBlock, block_type: &str, errs: &mut ErrorList) -> Option<String> {
    let labels = &raw.block.labels;
    if labels.len() != 1 {
        errs.push(schema_err(
            raw,
            format!("{block_type} must have a single label, got {}", labels.len()),
        ));
        return None;
    }
    let label = labels[0].as_str().to_string();
    if label.is_empty() {
        errs.push(schema_err(raw, format!("{block_type} label can't be empty")));
        return None;
    }
    Some(label)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{load_dir, DirParser};
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn parse(files: &[(&str, &str)]) -> Result<Config, ErrorList> {
        let root = Path::new("/project");
        let mut parser = DirParser::new(root, root).expect("parser must build");
        for (name, content) in files {
            parser
                .add_file_content(&root.join(name), content)
                .expect("file must be added");
        }
        parser.parse()?;
        validate(parser)
    }

    #[test]
    fn parses_terramate_block() {
        let config = parse(&[(
            "cfg.tm",
            r#"
terramate {
  required_version = "> 0.1.0"

  config {
    git {
      default_branch = "main"
      default_remote = "origin"
      disable_check_remote = true
    }
  }
}
"#,
        )])
        .expect("must parse");

        let tm = config.terramate.expect("terramate block");
        assert_eq!(tm.required_version.as_deref(), Some("> 0.1.0"));
        let git = tm.config.expect("config block").git.expect("git block");
        assert_eq!(git.default_branch.as_deref(), Some("main"));
        assert_eq!(git.default_remote.as_deref(), Some("origin"));
        assert!(git.disable_check_remote);
        assert!(!git.disable_check_untracked);
    }

    #[test]
    fn parses_stack_block() {
        let config = parse(&[(
            "stack.tm",
            r#"
stack {
  id          = "some-valid-id_"
  name        = "my stack"
  description = "some stack"
  after       = ["/prep", "/base"]
}
"#,
        )])
        .expect("must parse");

        let stack = config.stack.expect("stack block");
        assert_eq!(stack.id.as_deref(), Some("some-valid-id_"));
        assert_eq!(stack.name.as_deref(), Some("my stack"));
        assert_eq!(stack.after, vec!["/base".to_string(), "/prep".to_string()]);
    }

    #[test]
    fn rejects_invalid_stack_id() {
        let err = parse(&[("stack.tm", "stack {\n  id = \"no spaces allowed\"\n}\n")])
            .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn rejects_duplicated_stack_blocks() {
        let err = parse(&[
            ("a.tm", "stack {}\n"),
            ("b.tm", "stack {}\n"),
        ])
        .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn rejects_duplicated_set_entries() {
        let err = parse(&[("stack.tm", "stack {\n  after = [\"/a\", \"/a\"]\n}\n")])
            .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn rejects_top_level_attributes() {
        let err = parse(&[("a.tm", "attr = 1\n")]).expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn generate_hcl_requires_single_content_block() {
        let err = parse(&[("gen.tm", "generate_hcl \"out.tf\" {\n}\n")])
            .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));

        let err = parse(&[(
            "gen.tm",
            "generate_hcl \"out.tf\" {\n  content {}\n  content {}\n}\n",
        )])
        .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn generate_file_requires_content_attribute() {
        let err = parse(&[("gen.tm", "generate_file \"out.txt\" {\n}\n")])
            .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn generate_blocks_are_collected() {
        let config = parse(&[(
            "gen.tm",
            r#"
generate_hcl "out.tf" {
  condition = true
  content {
    x = 1
  }
}

generate_file "out.txt" {
  content = "hi"
}
"#,
        )])
        .expect("must parse");

        assert_eq!(config.generate_hcls.len(), 1);
        assert_eq!(config.generate_hcls[0].label, "out.tf");
        assert_eq!(config.generate_files.len(), 1);
        assert_eq!(config.generate_files[0].label, "out.txt");
    }

    #[test]
    fn load_dir_requires_descendant_dir() {
        let err = load_dir(Path::new("/project"), Path::new("/elsewhere"))
            .expect_err("must fail");
        assert!(err.has_kind(ErrorKind::Schema));
    }
}
