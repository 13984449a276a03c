//! File systems that templates can be loaded from.
//!
//! [`Template::parse_fs`](crate::Template::parse_fs) reads through a
//! [`TemplateFs`] instead of the host file system. Names are always
//! `/`-separated and relative to the source's root.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use glob::{MatchOptions, Pattern};

use crate::error::Result;

/// `*` and `?` never cross a `/`.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A read-only tree of template files.
pub trait TemplateFs {
    /// Names of the files matching the glob `pattern`, in lexical order.
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    /// Contents of the file called `name`.
    fn read(&self, name: &str) -> Result<String>;
}

/// Files held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: BTreeMap<String, String>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<String>) -> &mut Self {
        self.files.insert(name.into(), contents.into());
        self
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.insert(name, contents);
        self
    }
}

impl TemplateFs for MemFs {
    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = Pattern::new(pattern)?;
        Ok(self
            .files
            .keys()
            .filter(|name| pattern.matches_with(name, MATCH_OPTIONS))
            .cloned()
            .collect())
    }

    fn read(&self, name: &str) -> Result<String> {
        self.files.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("open {}: file does not exist", name))
                .into()
        })
    }
}

/// A directory on the host file system.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateFs for DirFs {
    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        Pattern::new(pattern)?;
        let root = Pattern::escape(&self.root.to_string_lossy());
        let full = format!("{}/{}", root.trim_end_matches(['/', MAIN_SEPARATOR]), pattern);

        let mut names = Vec::new();
        for path in glob::glob_with(&full, MATCH_OPTIONS)? {
            let path = path?;
            let rel = path.strip_prefix(&self.root).unwrap_or(&path);
            names.push(rel.to_string_lossy().replace(MAIN_SEPARATOR, "/"));
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.root.join(name))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn files() -> MemFs {
        MemFs::new()
            .with("sql/users.tmpl", "users")
            .with("sql/orders.tmpl", "orders")
            .with("sql/nested/items.tmpl", "items")
            .with("README", "docs")
    }

    #[test]
    fn test_mem_glob() {
        let fsys = files();
        assert_eq!(fsys.glob("sql/*.tmpl").unwrap(), vec!["sql/orders.tmpl", "sql/users.tmpl"]);
        assert_eq!(fsys.glob("sql/*/*.tmpl").unwrap(), vec!["sql/nested/items.tmpl"]);
        assert_eq!(fsys.glob("README").unwrap(), vec!["README"]);
        assert!(fsys.glob("").unwrap().is_empty());
    }

    #[test]
    fn test_mem_glob_bad_pattern() {
        assert!(matches!(files().glob("["), Err(Error::Pattern(_))));
    }

    #[test]
    fn test_mem_read() {
        let fsys = files();
        assert_eq!(fsys.read("sql/users.tmpl").unwrap(), "users");
        let err = fsys.read("sql/missing.tmpl").unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_dir_glob_is_relative() {
        let fsys = DirFs::new(env!("CARGO_MANIFEST_DIR"));
        let names = fsys.glob("tests/testdata/*.tmpl").unwrap();
        assert!(names.contains(&"tests/testdata/users.tmpl".to_string()));
        assert!(fsys.read("tests/testdata/users.tmpl").unwrap().contains("SELECT"));
    }
}
