//! Error types for sqltemplate.

use thiserror::Error;

/// Boxed error returned by [`Valuer`](crate::value::Valuer) implementations
/// and template functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure to turn a value into an SQL literal.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The (possibly resolved) value has no literal form.
    #[error("unsupported type {kind}")]
    UnsupportedType { kind: &'static str },

    /// A [`Valuer`](crate::value::Valuer) failed to produce its value.
    #[error(transparent)]
    Valuer(BoxError),
}

impl EncodeError {
    /// Create an unsupported type error for the given kind name.
    pub fn unsupported(kind: &'static str) -> Self {
        Self::UnsupportedType { kind }
    }
}

/// The main error type for sqltemplate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse template source.
    #[error("template: {name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    /// Template execution failed.
    #[error("template: {name}:{line}: executing \"{name}\" at <{context}>: {message}")]
    Exec {
        name: String,
        line: usize,
        context: String,
        message: String,
    },

    /// The literal encoder rejected a pipeline value during execution.
    #[error("template: {name}:{line}: executing \"{name}\" at <{context}>: {source}")]
    Encode {
        name: String,
        line: usize,
        context: String,
        #[source]
        source: EncodeError,
    },

    /// The template has no definition.
    #[error("sqltemplate: {0:?} is an incomplete or empty template")]
    Incomplete(String),

    /// No associated template with the requested name.
    #[error("sqltemplate: no template {name:?} associated with template {parent:?}")]
    NoTemplate { name: String, parent: String },

    /// A function was registered under the encoder hook name.
    #[error("sqltemplate: function name {0:?} is reserved")]
    ReservedName(String),

    /// A function name that templates cannot call.
    #[error("sqltemplate: function name {0:?} is not a valid identifier")]
    InvalidFuncName(String),

    /// Unknown template option.
    #[error("sqltemplate: unrecognized option {0:?}")]
    UnrecognizedOption(String),

    /// `parse_files` called without files.
    #[error("sqltemplate: no files named in call to ParseFiles")]
    NoFiles,

    /// `parse_fs` called without patterns.
    #[error("sqltemplate: no patterns provided in call to ParseFS")]
    NoPatterns,

    /// A glob pattern matched nothing.
    #[error("sqltemplate: pattern matches no files: `{0}`")]
    NoMatch(String),

    /// Invalid glob pattern.
    #[error("syntax error in pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A glob match could not be read.
    #[error("glob error: {0}")]
    Glob(#[from] glob::GlobError),

    /// Invalid configuration file.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a parse error for template `name` at `line`.
    pub fn parse(name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            name: name.into(),
            line,
            message: message.into(),
        }
    }
}

/// Result type alias for sqltemplate operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
