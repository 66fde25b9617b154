/// Pool exclusivity race proof
///
/// Hammers one language pool with concurrent acquirers and checks that no
/// sandbox id is ever held by two leases at once and that every lease is
/// returned when the round ends.
use crate::config::types::{Result, SandboxId, WarmboxError};
use crate::core::pool::SandboxPool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Race proof configuration
#[derive(Debug, Clone)]
pub struct RaceProofConfig {
    /// Language whose pool is exercised
    pub language: String,

    /// Concurrent acquirers per round
    pub concurrency: usize,

    /// Number of rounds
    pub test_iterations: usize,

    /// How long each acquirer holds its lease
    pub hold: Duration,

    /// Fail fast on the first violation
    pub strict_mode: bool,
}

impl Default for RaceProofConfig {
    fn default() -> Self {
        RaceProofConfig {
            language: "python".to_string(),
            concurrency: 8,
            test_iterations: 100,
            hold: Duration::from_millis(1),
            strict_mode: true,
        }
    }
}

/// Race proof result
#[derive(Debug, Clone)]
pub struct RaceProofResult {
    /// Total rounds run
    pub iterations: usize,

    /// Leases acquired and returned without incident
    pub successes: usize,

    /// Acquisitions that failed
    pub failures: usize,

    /// Ids observed in two live leases at once
    pub double_leases: Vec<String>,

    /// Entries still flagged in use after a round finished
    pub leaked_leases: usize,

    /// Pool size after the last round
    pub final_size: usize,
}

impl RaceProofResult {
    pub fn new(iterations: usize) -> Self {
        RaceProofResult {
            iterations,
            successes: 0,
            failures: 0,
            double_leases: Vec::new(),
            leaked_leases: 0,
            final_size: 0,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.failures == 0 && self.double_leases.is_empty() && self.leaked_leases == 0
    }
}

/// Run the race proof suite against `pool`
pub async fn run_race_proof_suite(
    pool: &Arc<SandboxPool>,
    config: &RaceProofConfig,
) -> Result<RaceProofResult> {
    let mut result = RaceProofResult::new(config.test_iterations);
    let held: Arc<Mutex<HashSet<SandboxId>>> = Arc::new(Mutex::new(HashSet::new()));

    log::info!(
        "Starting race proof suite: {} rounds x {} acquirers on {}",
        config.test_iterations,
        config.concurrency,
        config.language
    );

    for iteration in 0..config.test_iterations {
        let tasks: Vec<_> = (0..config.concurrency)
            .map(|_| {
                let pool = Arc::clone(pool);
                let held = Arc::clone(&held);
                let language = config.language.clone();
                let hold = config.hold;
                tokio::spawn(async move {
                    let lease = pool.acquire(&language).await?;
                    let id = lease.id().clone();

                    let fresh = held
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(id.clone());
                    tokio::time::sleep(hold).await;
                    if fresh {
                        held.lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .remove(&id);
                    }
                    drop(lease);
                    Ok::<_, WarmboxError>((id, fresh))
                })
            })
            .collect();

        for task in futures_util::future::join_all(tasks).await {
            match task {
                Ok(Ok((_, true))) => result.successes += 1,
                Ok(Ok((id, false))) => {
                    log::error!("Sandbox {} leased twice in round {}", id, iteration);
                    result.double_leases.push(id.to_string());
                }
                Ok(Err(err)) => {
                    log::warn!("Acquire failed in round {}: {}", iteration, err);
                    result.failures += 1;
                }
                Err(join) => {
                    log::warn!("Acquirer task failed in round {}: {}", iteration, join);
                    result.failures += 1;
                }
            }
        }

        let leaked = pool.in_use(&config.language);
        result.leaked_leases += leaked;

        if config.strict_mode && !result.is_pass() {
            return Err(WarmboxError::Execution(format!(
                "race proof violated in round {}: {} double leases, {} leaked, {} failures",
                iteration,
                result.double_leases.len(),
                result.leaked_leases,
                result.failures
            )));
        }
    }

    result.final_size = pool.size(&config.language);
    log::info!(
        "Race proof suite complete: {} clean leases, pool size {}",
        result.successes,
        result.final_size
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LanguageRegistry;
    use crate::testing::mock_runtime::InMemoryRuntime;

    #[test]
    fn test_race_proof_config_default() {
        let config = RaceProofConfig::default();
        assert!(config.strict_mode);
        assert_eq!(config.test_iterations, 100);
    }

    #[test]
    fn test_race_proof_result_pass() {
        let mut result = RaceProofResult::new(10);
        assert!(result.is_pass());

        result.leaked_leases = 1;
        assert!(!result.is_pass());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_survives_race_proof() {
        let pool = Arc::new(SandboxPool::new(
            Arc::new(InMemoryRuntime::new()),
            Arc::new(LanguageRegistry::new()),
        ));
        pool.initialize(&["javascript".to_string()], 2).await;

        let config = RaceProofConfig {
            language: "javascript".to_string(),
            concurrency: 6,
            test_iterations: 20,
            ..Default::default()
        };
        let result = run_race_proof_suite(&pool, &config).await.unwrap();

        assert!(result.is_pass());
        assert_eq!(result.successes, 120);
        assert!(result.final_size >= 2 && result.final_size <= 6);
    }
}
