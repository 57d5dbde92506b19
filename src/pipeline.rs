//! Pipeline invocation through the query cache.
//!
//! [`QueryRunner`] is the caller side of the cache contract: normalize the
//! query, consult the cache, run the pipeline on a miss and store what it
//! produced. The pipeline itself (planner, researcher, validator) lives
//! outside this crate behind the [`Pipeline`] trait.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, NormalizedQuery, QueryCache, QueryParams};
use crate::error::{CacheError, Result};

/// What a pipeline run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    /// A finished result. Cached.
    Complete(serde_json::Value),
    /// The pipeline needs the user to clarify the query. Returned, never cached.
    NeedsClarification(serde_json::Value),
}

/// The expensive multi-step research pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, query: &NormalizedQuery) -> Result<PipelineOutput>;
}

/// Result handed back to the caller of [`QueryRunner::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub key: CacheKey,
    pub payload: serde_json::Value,
    pub from_cache: bool,
    pub needs_clarification: bool,
    /// Creation time of the cached entry on a hit.
    pub cached_at: Option<DateTime<Utc>>,
}

/// Runs queries through the cache and the pipeline.
pub struct QueryRunner {
    cache: Arc<QueryCache>,
    pipeline: Box<dyn Pipeline>,
}

impl QueryRunner {
    pub fn new(cache: Arc<QueryCache>, pipeline: Box<dyn Pipeline>) -> Self {
        Self { cache, pipeline }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Answer `params`, from cache when possible.
    ///
    /// Invalid parameters fail before the cache is touched. Pipeline errors
    /// propagate and are never cached. A failed cache write is logged and the
    /// fresh payload is returned anyway.
    pub async fn execute(&self, params: &QueryParams, force_refresh: bool) -> Result<QueryOutcome> {
        let normalized = params.normalize()?;
        let key = normalized.key();

        if let Some(entry) = self.cache.lookup(&key, force_refresh) {
            info!(key = %key.short(), "Serving cached result");
            return Ok(QueryOutcome {
                key,
                payload: entry.payload,
                from_cache: true,
                needs_clarification: false,
                cached_at: Some(entry.created_at),
            });
        }

        debug!(key = %key.short(), force_refresh, "Running pipeline");
        match self.pipeline.run(&normalized).await? {
            PipelineOutput::Complete(payload) => {
                match self.cache.store_described(
                    &key,
                    Some(normalized.describe()),
                    payload.clone(),
                    Utc::now(),
                ) {
                    Ok(_) => {}
                    Err(e) if e.is_storage_fault() => {
                        warn!(key = %key.short(), error = %e, "Result not persisted; returning it uncached");
                    }
                    Err(e) => return Err(e),
                }
                Ok(QueryOutcome {
                    key,
                    payload,
                    from_cache: false,
                    needs_clarification: false,
                    cached_at: None,
                })
            }
            PipelineOutput::NeedsClarification(payload) => {
                info!(key = %key.short(), "Pipeline asked for clarification");
                Ok(QueryOutcome {
                    key,
                    payload,
                    from_cache: false,
                    needs_clarification: true,
                    cached_at: None,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CommandPipeline
// ---------------------------------------------------------------------------

/// Runs an external program as the pipeline.
///
/// The normalized query is written to the program's stdin as JSON and its
/// stdout is parsed as the JSON payload. A payload object whose `status` is
/// `needs_clarification` is not cached; a `status` of `error` fails the run.
pub struct CommandPipeline {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run_process(&self, input: Vec<u8>) -> Result<std::process::Output> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CacheError::Pipeline(format!("failed to start '{}': {}", self.program, e)))?;

        // Feed stdin while stdout is drained so large echoes cannot fill both pipes.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                drop(stdin);
                written
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CacheError::Pipeline(format!("'{}' failed: {}", self.program, e)))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The program may legitimately exit without reading its input.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(CacheError::Pipeline(format!("failed to write query: {}", e)))
                }
                Err(e) => {
                    return Err(CacheError::Pipeline(format!("stdin writer aborted: {}", e)))
                }
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl Pipeline for CommandPipeline {
    async fn run(&self, query: &NormalizedQuery) -> Result<PipelineOutput> {
        let input = serde_json::to_vec(query)?;
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_process(input))
                .await
                .map_err(|_| {
                    CacheError::Pipeline(format!(
                        "'{}' timed out after {}s",
                        self.program,
                        limit.as_secs()
                    ))
                })??,
            None => self.run_process(input).await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CacheError::Pipeline(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let payload: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            CacheError::Pipeline(format!("'{}' did not print valid JSON: {}", self.program, e))
        })?;
        classify(payload)
    }
}

fn classify(payload: serde_json::Value) -> Result<PipelineOutput> {
    match payload.get("status").and_then(|s| s.as_str()) {
        Some("needs_clarification") => Ok(PipelineOutput::NeedsClarification(payload)),
        Some("error") => {
            let message = payload
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("pipeline reported an error");
            Err(CacheError::Pipeline(message.to_string()))
        }
        _ => Ok(PipelineOutput::Complete(payload)),
    }
}
