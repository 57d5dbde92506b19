//! `regcache run` command handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use regcache::{CommandPipeline, Config, QueryRunner};

use super::{open_cache, QueryArgs};

/// Answer a query through the cache, running `program` on a miss.
pub(crate) async fn cmd_run(
    config: &Config,
    args: &QueryArgs,
    force: bool,
    timeout_secs: Option<u64>,
    program: Vec<String>,
) -> Result<()> {
    let params = args.to_params()?;
    let mut argv = program.into_iter();
    let Some(binary) = argv.next() else {
        anyhow::bail!("No pipeline program given");
    };
    let mut pipeline = CommandPipeline::new(binary, argv.collect());
    if let Some(secs) = timeout_secs {
        pipeline = pipeline.with_timeout(Duration::from_secs(secs));
    }

    let cache = Arc::new(open_cache(config)?);
    let runner = QueryRunner::new(cache.clone(), Box::new(pipeline));
    let outcome = runner
        .execute(&params, force)
        .await
        .with_context(|| "Query failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    drop(runner);
    if let Ok(cache) = Arc::try_unwrap(cache) {
        cache.close();
    }
    Ok(())
}
