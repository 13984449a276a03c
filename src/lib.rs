//! # sqltemplate — SQL text templates with automatic literal escaping
//!
//! > **Stop quoting strings. Hook your values.**
//!
//! Templates use the familiar `{{ }}` action syntax. Before a template is
//! stored, every pipeline that writes a value gets a final call to the
//! encoder hook, so data can only reach the query text as a SQL literal.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqltemplate::prelude::*;
//!
//! let mut t = Template::new("users");
//! t.parse("SELECT * FROM users WHERE name = {{.name}} AND active = {{.active}}")?;
//!
//! let sql = t.render(serde_json::json!({"name": "O'Brien", "active": true}))?;
//! // => "SELECT * FROM users WHERE name = 'O''Brien' AND active = TRUE"
//! ```
//!
//! ## Literals
//!
//! | Value        | Output                   |
//! |--------------|--------------------------|
//! | `Null`       | `NULL`                   |
//! | `Bool`       | `TRUE` / `FALSE`         |
//! | `String`     | `'it''s'`                |
//! | `Bytes`      | `'\x0A0B'`               |
//! | `Identifier` | `"column name"`          |
//! | `RawSql`     | passed through unchanged |

pub mod config;
pub mod error;
pub mod escape;
pub mod exec;
pub mod funcs;
pub mod literal;
pub mod parse;
pub mod source;
pub mod template;
pub mod value;

pub use template::{must, parse_files, parse_fs, parse_glob, Template};

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::*;
    pub use crate::escape::{escape_tree, SQL_LITERAL};
    pub use crate::exec::MissingKey;
    pub use crate::funcs::FuncMap;
    pub use crate::literal::{postgres_literal, Encoder, ToSqlLiteral};
    pub use crate::source::{DirFs, MemFs, TemplateFs};
    pub use crate::template::{must, Template};
    pub use crate::value::{Identifier, RawSql, Value, Valuer};
}

/// Format a single value as a PostgreSQL literal.
///
/// ```
/// use sqltemplate::sql_literal;
///
/// let sql = sql_literal("O'Brien").unwrap();
/// assert_eq!(sql.as_str(), "'O''Brien'");
/// ```
pub fn sql_literal(value: impl Into<value::Value>) -> Result<value::RawSql, error::EncodeError> {
    use crate::literal::ToSqlLiteral;

    let value: value::Value = value.into();
    value.to_sql_literal()
}
