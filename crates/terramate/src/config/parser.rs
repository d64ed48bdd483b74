//! multi-file directory parser and import resolution

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hcl::eval::Evaluate;
use hcl_edit::Span as _;

use crate::config::merge::{span_range, MergedBlock};
use crate::error::{Error, ErrorKind, ErrorList, SourceRange};
use crate::project;

/// Block types that merge by attribute union within a directory scope.
const MERGEABLE: &[&str] = &["terramate", "globals"];

/// Block types collected as-is for later schema validation.
const UNMERGED: &[&str] = &["stack", "generate_hcl", "generate_file", "import"];

/// A non-mergeable top-level block together with its origin file.
#[derive(Debug, Clone)]
pub(crate) struct RawBlock {
    pub origin: PathBuf,
    pub source: Rc<str>,
    pub block: hcl_edit::structure::Block,
}

impl RawBlock {
    pub fn block_type(&self) -> &str {
        self.block.ident.value().as_str()
    }

    /// Range of the block header, when the parse preserved spans.
    pub fn range(&self) -> Option<SourceRange> {
        span_range(&self.origin, &self.source, self.block.ident.span())
    }
}

#[derive(Debug)]
struct SourceFile {
    path: PathBuf,
    source: Rc<str>,
}

/// Parser for the Terramate configuration of a single directory.
///
/// The configuration can span multiple files, so the parser first collects
/// the exact file set, then parses and merges them in lexicographic order.
/// Imports are resolved through sub-parsers sharing one parsed-files
/// registry, which is what detects cycles and duplicated imports.
#[derive(Debug)]
pub struct DirParser {
    rootdir: PathBuf,
    dir: PathBuf,
    files: Vec<SourceFile>,
    parsed: bool,

    pub(crate) merged_attrs: indexmap::IndexMap<String, crate::config::Attribute>,
    pub(crate) merged_blocks: indexmap::IndexMap<String, MergedBlock>,
    pub(crate) raw_blocks: Vec<RawBlock>,
}

impl DirParser {
    pub fn new(rootdir: &Path, dir: &Path) -> Result<DirParser, Error> {
        if !project::is_inside(rootdir, dir) {
            return Err(Error::new(
                ErrorKind::Schema,
                format!("directory {dir:?} is not inside project root {rootdir:?}"),
            ));
        }

        Ok(DirParser {
            rootdir: rootdir.to_path_buf(),
            dir: dir.to_path_buf(),
            files: Vec::new(),
            parsed: false,
            merged_attrs: Default::default(),
            merged_blocks: Default::default(),
            raw_blocks: Vec::new(),
        })
    }

    pub(crate) fn root_dir(&self) -> &Path {
        &self.rootdir
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Adds every Terramate file of the parser directory.
    pub fn add_dir(&mut self) -> Result<(), Error> {
        for filename in list_terramate_files(&self.dir)? {
            self.add_file(&self.dir.join(filename))?;
        }
        Ok(())
    }

    /// Reads and adds a single file.
    pub fn add_file(&mut self, path: &Path) -> Result<(), Error> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            Error::new(
                ErrorKind::Io,
                format!("reading config file {path:?}: {err}"),
            )
        })?;
        self.add_file_content(path, &data)
    }

    /// Adds a file to the set of files to be parsed.
    pub fn add_file_content(&mut self, path: &Path, data: &str) -> Result<(), Error> {
        if !project::is_inside(&self.dir, path) {
            return Err(Error::new(
                ErrorKind::Schema,
                format!("parser only accepts files from directory {:?}", self.dir),
            ));
        }
        if self.files.iter().any(|file| file.path == path) {
            return Err(Error::new(
                ErrorKind::Schema,
                format!("file {path:?} already added to the parser"),
            ));
        }

        self.files.push(SourceFile {
            path: path.to_path_buf(),
            source: Rc::from(data),
        });
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(())
    }

    /// Parses and merges the added files, then resolves imports. Can only
    /// be called once per parser.
    pub fn parse(&mut self) -> Result<(), ErrorList> {
        let mut registry = BTreeSet::new();
        self.parse_with_registry(&mut registry)
    }

    fn parse_with_registry(&mut self, registry: &mut BTreeSet<PathBuf>) -> Result<(), ErrorList> {
        if self.parsed {
            return Err(Error::new(ErrorKind::Schema, "files already parsed").into());
        }
        self.parsed = true;

        let mut errs = ErrorList::new();
        let mut bodies = Vec::new();

        for file in &self.files {
            match hcl_edit::parser::parse_body(&file.source) {
                Ok(body) => {
                    registry.insert(file.path.clone());
                    bodies.push((file.path.clone(), Rc::clone(&file.source), body));
                }
                Err(err) => errs.push(Error::new(
                    ErrorKind::HclSyntax,
                    format!("{}: {err}", file.path.display()),
                )),
            }
        }

        for (path, source, body) in bodies {
            self.merge_body(&path, &source, body, &mut errs);
        }

        self.apply_imports(registry, &mut errs);

        errs.into_result()
    }

    fn merge_body(
        &mut self,
        origin: &Path,
        source: &Rc<str>,
        body: hcl_edit::structure::Body,
        errs: &mut ErrorList,
    ) {
        for structure in body.into_iter() {
            match structure {
                hcl_edit::structure::Structure::Attribute(attr) => {
                    let name = attr.key.value().as_str().to_string();
                    let range = span_range(origin, source, attr.key.span());
                    if self.merged_attrs.contains_key(&name) {
                        let mut err = Error::new(
                            ErrorKind::Schema,
                            format!("attribute {name:?} redeclared"),
                        );
                        if let Some(range) = range {
                            err = err.at(range);
                        }
                        errs.push(err);
                        continue;
                    }
                    self.merged_attrs.insert(
                        name,
                        crate::config::Attribute {
                            origin: origin.to_path_buf(),
                            expr: attr.value.clone(),
                            range,
                        },
                    );
                }
                hcl_edit::structure::Structure::Block(block) => {
                    let block_type = block.ident.value().as_str().to_string();
                    if MERGEABLE.contains(&block_type.as_str()) {
                        let kind = collision_kind(&block_type);
                        let merged = self.merged_blocks.entry(block_type).or_default();
                        if let Err(list) = merged.merge(origin, source, &block, kind) {
                            errs.merge(list);
                        }
                    } else if UNMERGED.contains(&block_type.as_str()) {
                        self.raw_blocks.push(RawBlock {
                            origin: origin.to_path_buf(),
                            source: Rc::clone(source),
                            block,
                        });
                    } else {
                        let mut err = Error::new(
                            ErrorKind::Schema,
                            format!("unrecognized block {block_type:?}"),
                        );
                        if let Some(range) = span_range(origin, source, block.ident.span()) {
                            err = err.at(range);
                        }
                        errs.push(err);
                    }
                }
            }
        }
    }

    fn apply_imports(&mut self, registry: &mut BTreeSet<PathBuf>, errs: &mut ErrorList) {
        let mut imports = Vec::new();
        self.raw_blocks.retain(|raw| {
            if raw.block_type() == "import" {
                imports.push(raw.clone());
                false
            } else {
                true
            }
        });

        for import in imports {
            if let Err(list) = self.handle_import(&import, registry) {
                errs.merge(list);
            }
        }
    }

    fn handle_import(
        &mut self,
        import: &RawBlock,
        registry: &mut BTreeSet<PathBuf>,
    ) -> Result<(), ErrorList> {
        let source = validate_import_block(import)?;

        let src = Path::new(&source);
        let src_base = src.file_name().ok_or_else(|| {
            import_err(import, format!("import source {source:?} has no filename"))
        })?;
        let src_dir = src.parent().unwrap_or_else(|| Path::new(""));

        let src_dir = if src.is_absolute() {
            // project-absolute path
            let rel = src_dir.strip_prefix("/").unwrap_or(src_dir);
            self.rootdir.join(rel)
        } else {
            self.dir.join(src_dir)
        };
        let src_dir = project::normalize(&src_dir);

        if src_dir == self.dir {
            return Err(import_err(
                import,
                "importing files in the same directory is not permitted",
            )
            .into());
        }
        if project::is_inside(&src_dir, &self.dir) {
            return Err(import_err(
                import,
                "importing files in the same tree is not permitted",
            )
            .into());
        }

        let src_path = src_dir.join(src_base);
        if registry.contains(&src_path) {
            return Err(import_err(
                import,
                format!("file {src_path:?} already parsed"),
            )
            .into());
        }

        tracing::trace!(file = %src_path.display(), "resolving import");

        let mut sub = DirParser::new(&self.rootdir, &src_dir)
            .map_err(|err| import_err(import, format!("failed to create sub parser: {err}")))?;
        sub.add_file(&src_path)
            .map_err(|err| import_err(import, err.to_string()))?;
        sub.parse_with_registry(registry)?;

        let mut errs = ErrorList::new();
        for raw in &sub.raw_blocks {
            if raw.block_type() == "stack" {
                errs.push(import_err(import, "import of stack block is not permitted"));
            }
        }

        let mut fold = ErrorList::new();
        for (name, attr) in sub.merged_attrs {
            if self.merged_attrs.contains_key(&name) {
                fold.push(Error::new(
                    ErrorKind::Schema,
                    format!("attribute {name:?} redeclared"),
                ));
                continue;
            }
            self.merged_attrs.insert(name, attr);
        }
        for (block_type, block) in sub.merged_blocks {
            let kind = collision_kind(&block_type);
            let merged = self.merged_blocks.entry(block_type).or_default();
            fold.merge_wrap(kind, merged.merge_from(&block, kind));
        }
        self.raw_blocks
            .extend(sub.raw_blocks.into_iter().filter(|raw| raw.block_type() != "stack"));

        errs.merge_wrap(ErrorKind::Import, fold.into_result());
        errs.into_result()
    }
}

fn collision_kind(block_type: &str) -> ErrorKind {
    if block_type == "globals" {
        ErrorKind::GlobalRedefined
    } else {
        ErrorKind::Schema
    }
}

fn import_err(import: &RawBlock, msg: impl Into<String>) -> Error {
    let err = Error::new(ErrorKind::Import, msg);
    match import.range() {
        Some(range) => err.at(range),
        None => err,
    }
}

/// Checks the `import` block shape and returns its `source` string.
fn validate_import_block(import: &RawBlock) -> Result<String, ErrorList> {
    let mut errs = ErrorList::new();
    let block = &import.block;

    if !block.labels.is_empty() {
        errs.push(import_err(import, "import must have no labels"));
    }

    let mut source = None;
    for attr in block.body.attributes() {
        match attr.key.value().as_str() {
            "source" => {
                let expr: hcl::Expression = attr.value.clone().into();
                match expr.evaluate(&hcl::eval::Context::new()) {
                    Ok(hcl::Value::String(s)) => source = Some(s),
                    Ok(_) => {
                        errs.push(import_err(import, "import.source must be a string"));
                    }
                    Err(err) => {
                        errs.push(import_err(
                            import,
                            format!("failed to evaluate import.source: {err}"),
                        ));
                    }
                }
            }
            other => {
                errs.push(import_err(
                    import,
                    format!("unrecognized attribute import.{other}"),
                ));
            }
        }
    }
    for sub in block.body.blocks() {
        errs.push(import_err(
            import,
            format!("unrecognized block import.{}", sub.ident.value().as_str()),
        ));
    }

    match source {
        Some(source) if errs.is_empty() => Ok(source),
        Some(_) => Err(errs),
        None => {
            errs.push(import_err(import, "import must declare a \"source\" attribute"));
            Err(errs)
        }
    }
}

/// Lists the configuration files of a directory: regular files with a `.tm`
/// or `.tm.hcl` suffix, skipping dotfiles and subdirectories.
pub fn list_terramate_files(dir: &Path) -> Result<Vec<String>, Error> {
    let mut files = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::new(
            ErrorKind::Io,
            format!("reading dir {dir:?}: {err}"),
        )
    })?;

    for entry in entries {
        let entry = entry.map_err(Error::from)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type().map_err(Error::from)?.is_file() {
            continue;
        }
        if is_terramate_file(&name) {
            files.push(name);
        }
    }

    files.sort();
    Ok(files)
}

fn is_terramate_file(filename: &str) -> bool {
    filename.ends_with(".tm") || filename.ends_with(".tm.hcl")
}
