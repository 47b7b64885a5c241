//! Modelbase Command-Line Tool
//!
//! Loads a model manifest, synthesizes its schema and emits DDL or
//! bootstraps a database.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use modelbase_core::Dialect;
use std::path::PathBuf;

/// Modelbase Command-Line Tool
#[derive(Parser, Debug)]
#[command(name = "modelbase")]
#[command(version, about = "Synthesize storage schemas from model manifests")]
pub struct Args {
    /// Model manifest (JSON)
    #[arg(short = 'm', long, env = "MODELBASE_MANIFEST")]
    pub manifest: PathBuf,

    /// Enabled extensions
    #[arg(short = 'e', long = "extension", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Fail on foreign keys whose target table is missing
    #[arg(long)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print CREATE TABLE statements
    Ddl {
        /// Target dialect
        #[arg(short, long, default_value = "sqlite", value_enum)]
        dialect: DialectArg,

        /// Restrict to `core` or one extension
        #[arg(short, long)]
        partition: Option<String>,
    },

    /// Print the synthesized catalog as JSON
    Dump,

    /// Describe one synthesized table
    Describe {
        /// Table name
        table: String,
    },

    /// Report partitions and dangling foreign keys
    Check,

    /// Create tables and insert seed rows in the configured database
    Create {
        /// Database name prefix
        #[arg(long, env = "MODELBASE_DB_PREFIX")]
        prefix: Option<String>,

        /// Skip seed rows
        #[arg(long)]
        no_seed: bool,

        /// Restrict to `core` or one extension
        #[arg(short, long)]
        partition: Option<String>,
    },
}

/// Dialect selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectArg {
    /// SQLite
    Sqlite,
    /// PostgreSQL
    Postgres,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => Dialect::Sqlite,
            DialectArg::Postgres => Dialect::Postgres,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelbase=info,modelbase_core=warn,modelbase_db=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = commands::load(&args.manifest, &args.extensions, args.strict)?;

    match args.command {
        Command::Ddl { dialect, partition } => {
            let scope = commands::parse_scope(partition.as_deref());
            print!("{}", commands::ddl(&registry, dialect.into(), &scope)?);
        }
        Command::Dump => {
            println!("{}", serde_json::to_string_pretty(&registry.catalog().dump())?);
        }
        Command::Describe { table } => match registry.catalog().describe(&table) {
            Some(description) => println!("{description}"),
            None => return Err(commands::CliError::UnknownTable(table).into()),
        },
        Command::Check => {
            let report = commands::check(&registry);
            print!("{report}");
            if !report.is_clean() {
                return Err(commands::CliError::Dangling(report.dangling.len()).into());
            }
        }
        Command::Create {
            prefix,
            no_seed,
            partition,
        } => {
            let scope = commands::parse_scope(partition.as_deref());
            let outcome = commands::create(&registry, prefix.as_deref(), !no_seed, &scope)?;
            println!(
                "created {} table(s), seeded {} row(s) in {}",
                outcome.created.len(),
                outcome.seeded,
                outcome.database
            );
        }
    }
    Ok(())
}
