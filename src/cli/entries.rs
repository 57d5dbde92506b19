//! Cache inspection and maintenance command handlers.

use anyhow::{Context, Result};
use chrono::Utc;

use regcache::{CacheKey, QueryCache};

/// List live entries, newest first.
pub(crate) fn cmd_list(cache: &QueryCache, limit: usize) -> Result<()> {
    let items = cache.list(Utc::now());
    if items.is_empty() {
        println!("No cached queries.");
        return Ok(());
    }

    println!("Showing {} of {} cached quer(ies):", items.len().min(limit), items.len());
    println!("{:<16} {:>8} {:>10}  {}", "Key", "Age(min)", "Size(B)", "Query");
    println!("{}", "-".repeat(72));
    for item in items.iter().take(limit) {
        println!(
            "{:<16} {:>8} {:>10}  {}",
            &item.key.as_str()[..16],
            item.age_minutes,
            item.size,
            item.description.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub(crate) fn cmd_stats(cache: &QueryCache) -> Result<()> {
    let stats = cache.stats(Utc::now());
    println!("Directory: {}", cache.dir().display());
    println!("TTL:       {}h", cache.ttl().num_hours());
    println!("Entries:   {}", stats.total_entries);
    println!("Size:      {:.2} KB", stats.total_size as f64 / 1024.0);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("Oldest:    {}", oldest.to_rfc3339());
        println!("Newest:    {}", newest.to_rfc3339());
    }
    Ok(())
}

/// Print a live entry's payload as JSON.
pub(crate) fn cmd_show(cache: &QueryCache, key: &CacheKey) -> Result<()> {
    let Some(entry) = cache.lookup(key, false) else {
        anyhow::bail!("No live cache entry for {}", key);
    };
    if let Some(description) = &entry.description {
        eprintln!("Query:   {}", description);
    }
    eprintln!("Expires: {}", entry.expires_at.to_rfc3339());
    println!("{}", serde_json::to_string_pretty(&entry.payload)?);
    Ok(())
}

pub(crate) fn cmd_delete(cache: &QueryCache, key: &CacheKey) -> Result<()> {
    if cache
        .invalidate(key)
        .with_context(|| format!("Failed to delete {}", key))?
    {
        println!("Deleted {}", key);
    } else {
        println!("No cache entry for {}", key);
    }
    Ok(())
}

pub(crate) fn cmd_clear(cache: &QueryCache) -> Result<()> {
    let removed = cache.clear().context("Failed to clear cache")?;
    println!("Cleared {} cache entr(ies).", removed);
    Ok(())
}

pub(crate) fn cmd_sweep(cache: &QueryCache) -> Result<()> {
    let removed = cache.sweep(Utc::now());
    println!("Removed {} expired entr(ies).", removed);
    Ok(())
}
