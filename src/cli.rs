/*!
datascope Command Line Interface

Inspect, query and profile a local SQLite database file.
*/

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use datascope::assist::{self, AssistConfig};
use datascope::execute;
use datascope::insights;
use datascope::reader::{Reader, SqliteReader};
use datascope::VERSION;

#[derive(Parser)]
#[command(name = "datascope")]
#[command(about = "Explore the schema and data of a SQLite database")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the tables and columns of a database
    Schema {
        /// Path to the database file
        database: PathBuf,

        /// Output format (json, ddl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Print a Mermaid ER diagram of the schema
    Diagram {
        /// Path to the database file
        database: PathBuf,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show one page of a table
    Table {
        /// Path to the database file
        database: PathBuf,

        /// Table to read
        table: String,

        /// 1-based page number
        #[arg(long, default_value = "1")]
        page: u64,

        /// Rows per page (1-100)
        #[arg(long, default_value = "20")]
        page_size: u64,
    },

    /// Run a SQL statement; writes are committed
    Query {
        /// The statement to run
        sql: Option<String>,

        /// Read the statement from a file instead
        #[arg(long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Path to the database file
        #[arg(long, short)]
        database: PathBuf,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the query plan for a statement without running it
    Explain {
        /// Path to the database file
        database: PathBuf,

        /// The statement to explain
        sql: String,
    },

    /// Profile every column of a table
    Insights {
        /// Path to the database file
        database: PathBuf,

        /// Table to profile
        table: String,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Build a text-to-SQL prompt for a request, or send it with --generate
    Prompt {
        /// Path to the database file
        database: PathBuf,

        /// What the query should answer
        request: String,

        /// Send the prompt to the configured model and print its SQL
        #[arg(long)]
        generate: bool,

        /// Base URL of an OpenAI-compatible API
        #[arg(long, env = "DATASCOPE_LLM_BASE_URL", default_value = assist::DEFAULT_BASE_URL)]
        llm_base_url: String,

        /// Model used for SQL generation
        #[arg(long, env = "DATASCOPE_LLM_MODEL", default_value = assist::DEFAULT_MODEL)]
        llm_model: String,

        /// API key for SQL generation
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

fn open(database: &Path) -> anyhow::Result<SqliteReader> {
    if !database.is_file() {
        bail!("Database file not found: {}", database.display());
    }
    Ok(SqliteReader::new(database))
}

fn emit(text: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Written to: {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn emit_json<T: Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    emit(&serde_json::to_string_pretty(value)?, output)
}

#[cfg(feature = "assist")]
fn generate(config: &AssistConfig, schema_description: &str, request: &str) -> anyhow::Result<String> {
    let Some(generator) = assist::OpenAiCompatibleGenerator::from_config(config) else {
        bail!("No API key configured. Set OPENAI_API_KEY or pass --api-key");
    };
    Ok(assist::generate_sql(&generator, schema_description, request)?)
}

#[cfg(not(feature = "assist"))]
fn generate(_: &AssistConfig, _: &str, _: &str) -> anyhow::Result<String> {
    bail!("SQL generation not compiled in. Rebuild with --features assist")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema { database, format } => {
            let schema = open(&database)?.introspect()?;
            match format.as_str() {
                "json" => emit_json(&schema, None)?,
                "ddl" => emit(&schema.to_ddl(), None)?,
                other => bail!("Unknown format '{}'. Available: json, ddl", other),
            }
        }

        Commands::Diagram { database, output } => {
            let schema = open(&database)?.introspect()?;
            emit(&schema.to_mermaid(), output.as_deref())?;
        }

        Commands::Table {
            database,
            table,
            page,
            page_size,
        } => {
            let reader = open(&database)?;
            let data = execute::execute_table(&reader, &table, page, page_size)?;
            emit_json(&data, None)?;
        }

        Commands::Query {
            sql,
            file,
            database,
            output,
        } => {
            let sql = match (sql, file) {
                (Some(sql), _) => sql,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Provide a statement or --file"),
            };
            let reader = open(&database)?;
            let outcome = execute::execute(&reader, &sql)?;
            emit_json(&outcome, output.as_deref())?;
        }

        Commands::Explain { database, sql } => {
            let reader = open(&database)?;
            let plan = execute::explain(&reader, &sql)?;
            emit_json(&plan, None)?;
        }

        Commands::Insights {
            database,
            table,
            output,
        } => {
            let reader = open(&database)?;
            let profile = insights::profile(&reader, &table)?;
            emit_json(&profile, output.as_deref())?;
        }

        Commands::Prompt {
            database,
            request,
            generate: send,
            llm_base_url,
            llm_model,
            api_key,
        } => {
            let schema_description = open(&database)?.introspect()?.to_ddl();
            if send {
                let config = AssistConfig {
                    base_url: llm_base_url,
                    model: llm_model,
                    api_key,
                    ..AssistConfig::default()
                };
                emit(&generate(&config, &schema_description, &request)?, None)?;
            } else {
                emit(&assist::render_prompt(&schema_description, &request), None)?;
            }
        }
    }

    Ok(())
}
