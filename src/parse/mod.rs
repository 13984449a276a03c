//! Template source parsing.
//!
//! [`parse`] turns template text into one [`Tree`] per template: the main
//! body plus every `{{define}}` and `{{block}}`.

mod lex;
pub mod node;
mod parser;

pub use node::*;
pub use parser::parse;

/// Settings that affect how template source is read.
#[derive(Clone, Copy)]
pub struct ParseOptions<'a> {
    pub left_delim: &'a str,
    pub right_delim: &'a str,
    /// Reports whether a function name is callable. Unknown names are parse
    /// errors.
    pub is_func: &'a dyn Fn(&str) -> bool,
}

fn any_func(_: &str) -> bool {
    true
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            left_delim: "{{",
            right_delim: "}}",
            is_func: &any_func,
        }
    }
}

impl std::fmt::Debug for ParseOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("left_delim", &self.left_delim)
            .field("right_delim", &self.right_delim)
            .finish_non_exhaustive()
    }
}
