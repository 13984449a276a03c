//! sqltemplate — render SQL templates from the command line
//!
//! # Usage
//!
//! ```bash
//! # Render a template with JSON data
//! sqltemplate render query.sql.tmpl --data params.json
//!
//! # Read data from stdin and pick an associated template
//! echo '{"id": 7}' | sqltemplate render queries/*.tmpl --name by_id --data -
//!
//! # Show where the encoder hook was inserted
//! sqltemplate explain query.sql.tmpl
//!
//! # Encode one value
//! sqltemplate literal '"O'\''Brien"'
//! ```

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use sqltemplate::prelude::{Config, MissingKey, Template, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqltemplate")]
#[command(version)]
#[command(about = "Render SQL templates with every value escaped as a literal", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqltemplate render query.tmpl --data params.json
    sqltemplate render 'queries/*.tmpl' --name by_id --data -
    sqltemplate explain query.tmpl
    sqltemplate literal '[1, 2]'")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render templates with JSON data
    Render {
        /// Template files (glob patterns are expanded)
        #[arg(required = true)]
        files: Vec<String>,

        /// JSON data file, or `-` for stdin
        #[arg(short, long)]
        data: Option<String>,

        /// Template to execute (defaults to the first file's name)
        #[arg(short, long)]
        name: Option<String>,

        /// Action delimiters, e.g. `[[,]]`
        #[arg(long, value_delimiter = ',', num_args = 2)]
        delims: Option<Vec<String>>,

        /// Missing key policy: default, invalid, zero or error
        #[arg(long)]
        missingkey: Option<MissingKey>,

        /// Config file (defaults to the user config directory)
        #[arg(long, env = "SQLTEMPLATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print templates after escaping
    Explain {
        /// Template files (glob patterns are expanded)
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Print the SQL literal for a JSON value
    Literal {
        /// A JSON value
        json: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Render {
            files,
            data,
            name,
            delims,
            missingkey,
            config,
        } => {
            let flags = Config {
                left_delim: delims.as_ref().and_then(|d| d.first().cloned()),
                right_delim: delims.as_ref().and_then(|d| d.get(1).cloned()),
                missing_key: missingkey,
            };
            render(&files, data.as_deref(), name.as_deref(), flags, config)
        }
        Commands::Explain { files } => explain(&files),
        Commands::Literal { json } => literal(&json),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "sqltemplate=debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Expand glob patterns; plain paths are kept as given.
fn expand(files: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for file in files {
        if file.contains(['*', '?', '[']) {
            let matched = glob::glob(file)?.collect::<Result<Vec<_>, _>>()?;
            if matched.is_empty() {
                bail!("pattern matches no files: `{}`", file);
            }
            paths.extend(matched);
        } else {
            paths.push(PathBuf::from(file));
        }
    }
    Ok(paths)
}

fn load_template(paths: &[PathBuf], config: &Config) -> Result<Template> {
    let first = paths.first().context("no template files given")?;
    let name = first
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut template = config.apply(Template::new(name));
    template.parse_files(paths)?;
    Ok(template)
}

fn read_data(source: Option<&str>) -> Result<Value> {
    let text = match source {
        None => return Ok(Value::Null),
        Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading data file {}", path))?
        }
    };
    let json: serde_json::Value = serde_json::from_str(&text).context("parsing JSON data")?;
    Ok(json.into())
}

fn render(
    files: &[String],
    data: Option<&str>,
    name: Option<&str>,
    flags: Config,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let file_config = match &config_path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default()?,
    };
    let config = file_config.merge(flags);
    tracing::debug!(?config, "render settings");

    let paths = expand(files)?;
    let template = load_template(&paths, &config)?;
    let data = read_data(data)?;

    let sql = match name {
        Some(name) => template.render_template(name, data)?,
        None => template.render(data)?,
    };
    let mut stdout = io::stdout().lock();
    stdout.write_all(sql.as_bytes())?;
    if !sql.ends_with('\n') {
        writeln!(stdout)?;
    }
    Ok(())
}

fn explain(files: &[String]) -> Result<()> {
    let paths = expand(files)?;
    let template = load_template(&paths, &Config::default())?;

    for t in template.templates() {
        let Some(tree) = t.tree() else { continue };
        println!("{} {}", "Template:".cyan().bold(), t.name().yellow());
        println!("{}", tree.to_string().white());
        println!();
    }
    Ok(())
}

fn literal(json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json).context("parsing JSON value")?;
    let sql = sqltemplate::sql_literal(value)?;
    println!("{}", sql.as_str().green());
    Ok(())
}
