//! Runtime-tunable knobs, with environment-variable overrides for
//! benchmarking without recompiling.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Item counts at or below this threshold run sequentially rather than
    /// fanning out to worker threads; avoids paying thread-spawn cost on
    /// small inputs. Override with `VELLUM_PARALLEL_MAP_THRESHOLD`.
    pub parallel_map_threshold: usize,
    /// Worker count for a parallel map dispatch above the threshold.
    /// `None` means derive it from `std::thread::available_parallelism()`
    /// at dispatch time, falling back to `1` if the platform query fails.
    /// Override with `VELLUM_PARALLEL_MAP_WORKERS`.
    pub parallel_map_workers: Option<usize>,
    /// Initial capacity hint for a codec's backreference table, to avoid
    /// reallocation churn on large documents. Override with
    /// `VELLUM_BACKREF_TABLE_HINT`.
    pub backref_table_hint: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel_map_threshold: 4,
            parallel_map_workers: None,
            backref_table_hint: 64,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from defaults, overriding any field whose `VELLUM_*`
    /// variable is set and parses. An unparsable value is ignored and the
    /// default is kept rather than treated as an error: this is a tuning
    /// knob, not a required input.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = read_usize("VELLUM_PARALLEL_MAP_THRESHOLD") {
            cfg.parallel_map_threshold = v;
        }
        if let Some(v) = read_usize("VELLUM_PARALLEL_MAP_WORKERS") {
            cfg.parallel_map_workers = Some(v);
        }
        if let Some(v) = read_usize("VELLUM_BACKREF_TABLE_HINT") {
            cfg.backref_table_hint = v;
        }
        cfg
    }

    pub fn resolved_worker_count(&self) -> usize {
        self.parallel_map_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn read_usize(var: &str) -> Option<usize> {
    env::var(var).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_is_four() {
        assert_eq!(RuntimeConfig::default().parallel_map_threshold, 4);
    }

    #[test]
    fn resolved_worker_count_falls_back_to_available_parallelism() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.resolved_worker_count() >= 1);
    }

    #[test]
    fn explicit_worker_override_wins() {
        let cfg = RuntimeConfig {
            parallel_map_workers: Some(7),
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.resolved_worker_count(), 7);
    }
}
