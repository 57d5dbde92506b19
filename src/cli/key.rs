//! `regcache key` command handler.

use anyhow::Result;

use super::QueryArgs;

/// Print the cache key and canonical form of a query.
pub(crate) fn cmd_key(args: &QueryArgs) -> Result<()> {
    let normalized = args.to_params()?.normalize()?;
    println!("{}", normalized.key());
    println!("normalized: {}", normalized.describe());
    Ok(())
}
