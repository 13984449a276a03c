//! The template facade.
//!
//! A [`Template`] owns a set of named, already escaped parse trees along
//! with the settings used to parse and run them.
//!
//! ```rust,ignore
//! use sqltemplate::prelude::*;
//!
//! let mut t = Template::new("q");
//! t.parse("SELECT * FROM users WHERE name = {{.}}")?;
//! assert_eq!(t.render("O'Brien")?, "SELECT * FROM users WHERE name = 'O''Brien'");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::escape::{escape_tree, SQL_LITERAL};
use crate::exec::{self, Env, MissingKey};
use crate::funcs::{builtins, is_valid_name, FuncMap};
use crate::literal::{default_encoder, Encoder};
use crate::parse::{self, ParseOptions, Tree};
use crate::source::TemplateFs;
use crate::value::Value;

const DEFAULT_LEFT_DELIM: &str = "{{";
const DEFAULT_RIGHT_DELIM: &str = "}}";

/// Definitions and settings shared by the templates of one set.
#[derive(Clone)]
struct Namespace {
    trees: BTreeMap<String, Arc<Tree>>,
    funcs: FuncMap,
    left_delim: String,
    right_delim: String,
    missing_key: MissingKey,
    encoder: Encoder,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            trees: BTreeMap::new(),
            funcs: FuncMap::new(),
            left_delim: DEFAULT_LEFT_DELIM.to_string(),
            right_delim: DEFAULT_RIGHT_DELIM.to_string(),
            missing_key: MissingKey::default(),
            encoder: default_encoder(),
        }
    }
}

/// A named SQL template whose output values are always SQL literals.
///
/// Cloning yields an independent template: parsing into the clone does not
/// affect the original. Trees are shared between clones until replaced.
#[derive(Clone)]
pub struct Template {
    name: String,
    ns: Namespace,
}

/// Return the value of `result`, panicking with the error message on failure.
///
/// For templates that are known to be valid, typically in initialization.
pub fn must<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}", err),
    }
}

impl Template {
    /// Create an empty template called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: Namespace::default(),
        }
    }

    /// Same as [`must`], for a template result.
    pub fn must(result: Result<Template>) -> Template {
        must(result)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The escaped parse tree of this template, if defined.
    pub fn tree(&self) -> Option<&Tree> {
        self.ns.trees.get(&self.name).map(Arc::as_ref)
    }

    /// A new, undefined template named `name` with this template's settings
    /// and definitions.
    pub fn new_template(&self, name: impl Into<String>) -> Template {
        Template {
            name: name.into(),
            ns: self.ns.clone(),
        }
    }

    /// Set the action delimiters for subsequent parses. Empty strings select
    /// the defaults `{{` and `}}`.
    pub fn delims(mut self, left: &str, right: &str) -> Self {
        self.ns.left_delim = if left.is_empty() { DEFAULT_LEFT_DELIM } else { left }.to_string();
        self.ns.right_delim = if right.is_empty() { DEFAULT_RIGHT_DELIM } else { right }.to_string();
        self
    }

    /// Add functions callable from subsequently parsed templates.
    ///
    /// The encoder hook name cannot be overridden.
    pub fn funcs(mut self, funcs: FuncMap) -> Result<Self> {
        for name in funcs.names() {
            if name == SQL_LITERAL {
                return Err(Error::ReservedName(name.to_string()));
            }
            if !is_valid_name(name) {
                return Err(Error::InvalidFuncName(name.to_string()));
            }
        }
        self.ns.funcs.extend(funcs);
        Ok(self)
    }

    /// Set an execution option. Supported: `missingkey=default`,
    /// `missingkey=invalid`, `missingkey=zero` and `missingkey=error`.
    pub fn option(mut self, opt: &str) -> Result<Self> {
        let policy = opt
            .split_once('=')
            .filter(|(key, _)| *key == "missingkey")
            .and_then(|(_, value)| value.parse::<MissingKey>().ok())
            .ok_or_else(|| Error::UnrecognizedOption(opt.to_string()))?;
        self.ns.missing_key = policy;
        Ok(self)
    }

    /// Typed form of `option("missingkey=...")`.
    pub fn missing_key_policy(mut self, policy: MissingKey) -> Self {
        self.ns.missing_key = policy;
        self
    }

    /// Replace the literal encoder called at the end of every emitting
    /// pipeline.
    pub fn encoder(mut self, encoder: Encoder) -> Self {
        self.ns.encoder = encoder;
        self
    }

    /// The missing-key policy currently in effect.
    pub fn missing_key(&self) -> MissingKey {
        self.ns.missing_key
    }

    /// Parse `text` as the body of this template.
    ///
    /// Nested `{{define}}` and `{{block}}` bodies become associated templates.
    /// Every tree is escaped before it is stored. A body consisting of only
    /// whitespace and comments does not replace an existing definition.
    pub fn parse(&mut self, text: &str) -> Result<&mut Self> {
        let name = self.name.clone();
        self.parse_as(&name, text)?;
        Ok(self)
    }

    fn parse_as(&mut self, name: &str, text: &str) -> Result<()> {
        let funcs = &self.ns.funcs;
        let is_func = |f: &str| f == SQL_LITERAL || funcs.contains(f) || builtins().contains(f);
        let opts = ParseOptions {
            left_delim: &self.ns.left_delim,
            right_delim: &self.ns.right_delim,
            is_func: &is_func,
        };
        let trees = parse::parse(name, text, &opts)?;

        for (tree_name, mut tree) in trees {
            if tree.is_empty() && self.ns.trees.contains_key(&tree_name) {
                debug!(template = %tree_name, "keeping existing definition");
                continue;
            }
            escape_tree(&mut tree);
            self.ns.trees.insert(tree_name, Arc::new(tree));
        }
        debug!(template = %name, defined = self.ns.trees.len(), "parsed template");
        Ok(())
    }

    /// Parse the named files. Each file becomes a template named after its
    /// base name.
    pub fn parse_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<&mut Self> {
        if paths.is_empty() {
            return Err(Error::NoFiles);
        }
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)?;
            let name = base_name(path);
            self.parse_as(&name, &text)?;
        }
        Ok(self)
    }

    /// Parse every file matching the glob `pattern`.
    pub fn parse_glob(&mut self, pattern: &str) -> Result<&mut Self> {
        let paths = glob_paths(pattern)?;
        self.parse_files(&paths)
    }

    /// Parse every file of `fsys` matching any of `patterns`. Each file
    /// becomes a template named after its base name.
    pub fn parse_fs(&mut self, fsys: &impl TemplateFs, patterns: &[&str]) -> Result<&mut Self> {
        if patterns.is_empty() {
            return Err(Error::NoFiles);
        }
        for pattern in patterns {
            let names = fsys.glob(pattern)?;
            if names.is_empty() {
                return Err(Error::NoMatch(pattern.to_string()));
            }
            for name in names {
                let text = fsys.read(&name)?;
                self.parse_as(fs_base_name(&name), &text)?;
            }
        }
        Ok(self)
    }

    /// Install a copy of `tree` as template `name`. The copy is escaped; the
    /// caller's tree is left untouched.
    pub fn add_parse_tree(&mut self, name: impl Into<String>, tree: &Tree) -> &mut Self {
        let name = name.into();
        let mut copy = tree.clone();
        copy.name = name.clone();
        escape_tree(&mut copy);
        self.ns.trees.insert(name, Arc::new(copy));
        self
    }

    /// The associated template called `name`, if defined.
    pub fn lookup(&self, name: &str) -> Option<Template> {
        self.ns
            .trees
            .contains_key(name)
            .then(|| self.new_template(name))
    }

    /// All defined templates of this set.
    pub fn templates(&self) -> Vec<Template> {
        self.ns
            .trees
            .keys()
            .map(|name| self.new_template(name.as_str()))
            .collect()
    }

    /// A description of the defined templates for error messages, such as
    /// `; defined templates are: "a", "b"`. Empty when nothing is defined.
    pub fn defined_templates(&self) -> String {
        if self.ns.trees.is_empty() {
            return String::new();
        }
        let names: Vec<String> = self.ns.trees.keys().map(|n| format!("{:?}", n)).collect();
        format!("; defined templates are: {}", names.join(", "))
    }

    /// Run this template with `data` and write the query text to `w`.
    pub fn execute<W: Write>(&self, w: &mut W, data: impl Into<Value>) -> Result<()> {
        let tree = self
            .ns
            .trees
            .get(&self.name)
            .ok_or_else(|| Error::Incomplete(self.name.clone()))?;
        self.run(w, tree, &data.into())
    }

    /// Run the associated template `name` with `data`.
    pub fn execute_template<W: Write>(&self, w: &mut W, name: &str, data: impl Into<Value>) -> Result<()> {
        let tree = self.ns.trees.get(name).ok_or_else(|| Error::NoTemplate {
            name: name.to_string(),
            parent: self.name.clone(),
        })?;
        self.run(w, tree, &data.into())
    }

    /// [`execute`](Self::execute) into a string.
    pub fn render(&self, data: impl Into<Value>) -> Result<String> {
        let mut out = Vec::new();
        self.execute(&mut out, data)?;
        into_string(out)
    }

    /// [`execute_template`](Self::execute_template) into a string.
    pub fn render_template(&self, name: &str, data: impl Into<Value>) -> Result<String> {
        let mut out = Vec::new();
        self.execute_template(&mut out, name, data)?;
        into_string(out)
    }

    fn run<W: Write>(&self, w: &mut W, tree: &Tree, data: &Value) -> Result<()> {
        let env = Env {
            trees: &self.ns.trees,
            funcs: &self.ns.funcs,
            encoder: &self.ns.encoder,
            missing_key: self.ns.missing_key,
        };
        debug!(template = %tree.name, "executing");
        exec::execute(&env, w, tree, data)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("templates", &self.ns.trees.keys().collect::<Vec<_>>())
            .field("funcs", &self.ns.funcs)
            .field("delims", &(&self.ns.left_delim, &self.ns.right_delim))
            .field("missing_key", &self.ns.missing_key)
            .finish_non_exhaustive()
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn fs_base_name(name: &str) -> &str {
    let name = name.trim_end_matches('/');
    name.rsplit('/').next().unwrap_or(name)
}

fn glob_paths(pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    let paths = glob::glob(pattern)?.collect::<Result<Vec<_>, _>>()?;
    if paths.is_empty() {
        return Err(Error::NoMatch(pattern.to_string()));
    }
    Ok(paths)
}

/// Create a template from the named files. It is named after the first
/// file's base name.
pub fn parse_files<P: AsRef<Path>>(paths: &[P]) -> Result<Template> {
    let first = paths.first().ok_or(Error::NoFiles)?;
    let mut t = Template::new(base_name(first.as_ref()));
    t.parse_files(paths)?;
    Ok(t)
}

/// Create a template from the files matching `pattern`. It is named after
/// the first match's base name.
pub fn parse_glob(pattern: &str) -> Result<Template> {
    let paths = glob_paths(pattern)?;
    parse_files(&paths)
}

/// Create a template from the files of `fsys` matching `patterns`. It is
/// named after the base name of the first match of the first pattern.
pub fn parse_fs(fsys: &impl TemplateFs, patterns: &[&str]) -> Result<Template> {
    let first = patterns.first().ok_or(Error::NoPatterns)?;
    let names = fsys.glob(first)?;
    let Some(name) = names.first() else {
        return Err(Error::NoMatch(first.to_string()));
    };
    let mut t = Template::new(fs_base_name(name));
    t.parse_fs(fsys, patterns)?;
    Ok(t)
}
