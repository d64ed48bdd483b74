//! # terramate - hierarchical stack configuration
//!
//! For a user guide and material related to CLI usage see the repository
//! README.
//!
//! ## Introduction for developers
//!
//! Read this to understand how the engine works internally.
//!
//! ### HCL Terms
//!
//! Quick introduction to terms used to describe elements of HCL documents.
//!
//! In hcl terms...
//! - a file gets parsed as a `body`
//! - ...which is just a list of `structures`
//! - ...where there are two kinds:
//!   - `attribute`: a "key = value" pair
//!   - or `block`:
//!     - 1 `identifier`
//!     - followed by 0 or more `labels`
//!     - and a `body` enclosed in `{` and `}`
//!
//! This is a valid configuration file:
//! ```hcl
//! terramate {
//!   required_version = "> 0.1.0"
//! }
//!
//! stack {
//!   name  = "networking"
//!   after = ["/stacks/base"]
//! }
//!
//! globals {
//!   env = "dev"
//! }
//!
//! generate_hcl "backend.tf" {
//!   content {
//!     backend = global.env
//!   }
//! }
//! ```
//!
//! ### Parsing a directory
//!
//! A directory's configuration spans every `.tm`/`.tm.hcl` file directly in
//! it. [config::load_dir] parses them in lexicographic order with
//! [hcl_edit::parser::parse_body], merges top-level attributes and the
//! mergeable block types (`terramate`, `globals`) by attribute union,
//! collects `stack` and `generate_*` blocks, resolves `import` blocks
//! through sub-parsers (a shared parsed-files registry detects cycles) and
//! schema-validates everything into a [config::Config]. Parsing never
//! partially succeeds: all validation failures of a directory are
//! aggregated into one [error::ErrorList].
//!
//! ### Stacks
//!
//! A stack is any directory whose configuration declares a `stack` block
//! ([stack]). Stack metadata (`name`, `path`, `description`) becomes the
//! `terramate` namespace during evaluation.
//!
//! ### Globals
//!
//! `globals` blocks bind names to expressions, hierarchically: definitions
//! closer to the stack shadow definitions above them ([globals]). Because
//! globals may reference each other, resolution runs a fixed point over the
//! pending expressions, refreshing the `global` namespace in the
//! [eval::Context] after each success, until everything resolved or no
//! pass makes progress.
//!
//! ### Partial evaluation
//!
//! `generate_hcl` content is arbitrary HCL that mixes Terramate-owned
//! references (`global.*`, `terramate.*`, `tm_*()` calls) with Terraform
//! references (`local.*`, `var.*`, anything else). [eval::partial] rewrites
//! only the Terramate-owned sub-expressions into their evaluated values and
//! preserves every other token byte-for-byte, comments and whitespace
//! included, by working on `hcl-edit`'s decor-preserving tree.
//!
//! ### Code generation
//!
//! [generate::do_generate] runs the pipeline per stack: load globals, load
//! the generate blocks of the ancestor chain (labels must be unique across
//! the chain), evaluate conditions, partial-evaluate `generate_hcl`
//! content, fully evaluate `generate_file` content, then sync the stack
//! directory. Generated HCL files carry a fixed header line which is how
//! they are recognized (and safely replaced or deleted) on later runs;
//! manually written files are never overwritten. The outcome is a
//! [generate::Report] listing created/changed/deleted files per stack.

pub mod config;
pub mod error;
pub mod eval;
pub mod generate;
pub mod globals;
pub mod order;
pub mod project;
pub mod run;
pub mod stack;
