use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use chainql::config::{DialectName, EngineConfig};
use chainql::query_cache::QueryCache;
use chainql::query_expr::QueryChain;
use chainql::query_planner::{rewrite_direct_statement, QueryBuilder};
use chainql::schema_catalog::MappingConfig;

/// chainql - translate chained query operations into SQL
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration YAML (defaults come from CHAINQL_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate a JSON operation chain against a YAML mapping
    Translate {
        /// Schema mapping YAML
        #[arg(long)]
        mapping: PathBuf,

        /// Operation chain JSON
        #[arg(long)]
        query: PathBuf,

        /// generic, postgres or oracle
        #[arg(long)]
        dialect: Option<String>,
    },
    /// Rewrite {N} placeholders of a hand-written statement
    Direct {
        #[arg(long, default_value = "generic")]
        dialect: String,

        text: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn translate(
    mut config: EngineConfig,
    mapping: &PathBuf,
    query: &PathBuf,
    dialect: Option<String>,
) -> anyhow::Result<serde_json::Value> {
    if let Some(dialect) = dialect {
        config.dialect = dialect.parse::<DialectName>()?;
    }

    let schema = MappingConfig::from_yaml_file(mapping)
        .and_then(|mapping| mapping.to_schema())
        .with_context(|| format!("loading mapping {}", mapping.display()))?;
    let text = std::fs::read_to_string(query)
        .with_context(|| format!("reading {}", query.display()))?;
    let chain = QueryChain::from_json(&text).context("parsing operation chain")?;

    let context = config.query_context(Arc::new(schema))?;
    let builder = QueryBuilder::new(Arc::new(QueryCache::new(config.cache_config())));
    let compiled = builder.get_select_query(&chain, &context)?;

    let parameters = compiled
        .parameters
        .iter()
        .map(|p| {
            Ok(json!({
                "name": p.name,
                "alias": p.alias,
                "type": p.ty,
                "value": p.value()?,
            }))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(json!({
        "sql": compiled.sql,
        "parameters": parameters,
        "execute_method": compiled.execute_method.map(|m| m.to_string()),
        "row_type": compiled.row_type(),
        "fingerprint": compiled.fingerprint,
    }))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Initialize logger - defaults to INFO level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Translate {
            mapping,
            query,
            dialect,
        } => {
            let output = translate(config, &mapping, &query, dialect)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Direct { dialect, text } => {
            let dialect = dialect.parse::<DialectName>()?.dialect()?;
            let (sql, names) = rewrite_direct_statement(&text, dialect.as_ref())?;
            log::info!("{} parameter(s): {}", names.len(), names.join(", "));
            println!("{}", sql);
        }
    }
    Ok(())
}
