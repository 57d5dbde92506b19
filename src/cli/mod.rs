//! Command-line interface for inspecting and driving the query cache.

mod entries;
mod key;
mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use regcache::{CacheKey, Config, QueryCache, QueryParams};

/// Persistent query cache for regulation research pipelines
#[derive(Parser)]
#[command(name = "regcache")]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.regcache/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the cache key for a query
    Key(QueryArgs),

    /// Answer a query through the cache, running PROGRAM on a miss
    Run {
        #[command(flatten)]
        query: QueryArgs,
        /// Ignore any cached result and re-run the pipeline
        #[arg(long)]
        force: bool,
        /// Kill the pipeline after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Pipeline program and its arguments
        #[arg(last = true, required = true)]
        program: Vec<String>,
    },

    /// List live cache entries, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show cache statistics
    Stats,

    /// Print a cached payload
    Show { key: String },

    /// Delete one cache entry
    Delete { key: String },

    /// Delete every cache entry
    Clear,

    /// Delete expired cache entries
    Sweep,
}

/// Query parameters shared by `key` and `run`.
#[derive(Args, Debug, Clone)]
pub(crate) struct QueryArgs {
    /// Free-text query
    #[arg(long, short)]
    pub query: String,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub industry: Option<String>,
    #[arg(long)]
    pub topic: Option<String>,
    /// Extra filter as name=value; repeatable
    #[arg(long = "filter", value_name = "NAME=VALUE")]
    pub filters: Vec<String>,
}

impl QueryArgs {
    pub(crate) fn to_params(&self) -> Result<QueryParams> {
        let mut params = QueryParams::new(self.query.clone());
        params.region = self.region.clone();
        params.industry = self.industry.clone();
        params.topic = self.topic.clone();
        for raw in &self.filters {
            let Some((name, value)) = raw.split_once('=') else {
                anyhow::bail!("Filter '{}' must look like name=value", raw);
            };
            params = params.filter(name, value);
        }
        Ok(params)
    }
}

pub(crate) async fn dispatch(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Key(query) => key::cmd_key(&query),
        Command::Run {
            query,
            force,
            timeout_secs,
            program,
        } => run::cmd_run(config, &query, force, timeout_secs, program).await,
        Command::List { limit } => entries::cmd_list(&open_cache(config)?, limit),
        Command::Stats => entries::cmd_stats(&open_cache(config)?),
        Command::Show { key } => entries::cmd_show(&open_cache(config)?, &parse_key(&key)?),
        Command::Delete { key } => entries::cmd_delete(&open_cache(config)?, &parse_key(&key)?),
        Command::Clear => entries::cmd_clear(&open_cache(config)?),
        Command::Sweep => entries::cmd_sweep(&open_cache(config)?),
    }
}

pub(crate) fn open_cache(config: &Config) -> Result<QueryCache> {
    QueryCache::open(&config.cache).with_context(|| {
        format!(
            "Failed to open query cache at {}",
            config.cache.resolved_dir().display()
        )
    })
}

fn parse_key(raw: &str) -> Result<CacheKey> {
    CacheKey::parse(raw).with_context(|| "Expected a 64-character key from `regcache list`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_with_trailing_program() {
        let cli = Cli::try_parse_from([
            "regcache", "run", "--query", "privacy", "--region", "tw", "--force", "--",
            "research", "--deep",
        ])
        .unwrap();
        let Command::Run {
            query,
            force,
            program,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(force);
        assert_eq!(query.region.as_deref(), Some("tw"));
        assert_eq!(program, vec!["research", "--deep"]);
    }

    #[test]
    fn test_filters_become_params() {
        let args = QueryArgs {
            query: "privacy".into(),
            region: None,
            industry: None,
            topic: None,
            filters: vec!["source=gazette".into(), "source=ministry".into()],
        };
        let params = args.to_params().unwrap();
        assert_eq!(params.filters["source"], vec!["gazette", "ministry"]);
    }

    #[test]
    fn test_malformed_filter_rejected() {
        let args = QueryArgs {
            query: "privacy".into(),
            region: None,
            industry: None,
            topic: None,
            filters: vec!["gazette".into()],
        };
        assert!(args.to_params().is_err());
    }
}
