//! Runtime tunables (spec §0.2 ambient addition), bundled the way
//! `rizqme-raya`'s `LintConfig` bundles linter tunables: one struct, a
//! `Default` impl carrying the spec's recommended values, taken by every
//! constructor that allocates a reactor or a handler stack.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How often the async reactor sweeps pending requests for expired
    /// deadlines (spec §4.5.2 recommends 500ms).
    pub deadline_sweep_interval: Duration,
    /// Frames the handler stack's backing array reserves up front.
    pub handler_stack_initial_capacity: usize,
    /// Frame count below which the handler stack grows geometrically;
    /// above it, growth is linear (spec §4.3).
    pub handler_stack_growth_threshold: usize,
    /// Intended scratch-byte budget for `stack::snapshot::restore_guarded`
    /// (see SPEC_FULL.md §9 supplement). Not currently wired to the actual
    /// guard region, which is a fixed-size stack array and so must be
    /// sized at compile time — see that module's `SCRATCH_BYTES` and the
    /// `DESIGN.md` entry for why. Kept here as the documented tunable a
    /// future `alloca`-backed implementation would read.
    pub restore_scratch_bytes: usize,
    /// Bound on concurrently pending async requests a single `IoDriver`
    /// will track before returning [`crate::error::FatalError::RequestTableExhausted`].
    pub max_pending_requests: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            deadline_sweep_interval: Duration::from_millis(500),
            handler_stack_initial_capacity: 32,
            handler_stack_growth_threshold: 1024,
            restore_scratch_bytes: 8 * 1024,
            max_pending_requests: 4096,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct RuntimeConfigOverrides {
    deadline_sweep_interval: Option<Duration>,
    handler_stack_initial_capacity: Option<usize>,
    handler_stack_growth_threshold: Option<usize>,
    restore_scratch_bytes: Option<usize>,
    max_pending_requests: Option<usize>,
}

impl RuntimeConfigBuilder {
    pub fn deadline_sweep_interval(mut self, v: Duration) -> Self {
        self.config.deadline_sweep_interval = Some(v);
        self
    }

    pub fn handler_stack_initial_capacity(mut self, v: usize) -> Self {
        self.config.handler_stack_initial_capacity = Some(v);
        self
    }

    pub fn handler_stack_growth_threshold(mut self, v: usize) -> Self {
        self.config.handler_stack_growth_threshold = Some(v);
        self
    }

    pub fn restore_scratch_bytes(mut self, v: usize) -> Self {
        self.config.restore_scratch_bytes = Some(v);
        self
    }

    pub fn max_pending_requests(mut self, v: usize) -> Self {
        self.config.max_pending_requests = Some(v);
        self
    }

    pub fn build(self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            deadline_sweep_interval: self
                .config
                .deadline_sweep_interval
                .unwrap_or(defaults.deadline_sweep_interval),
            handler_stack_initial_capacity: self
                .config
                .handler_stack_initial_capacity
                .unwrap_or(defaults.handler_stack_initial_capacity),
            handler_stack_growth_threshold: self
                .config
                .handler_stack_growth_threshold
                .unwrap_or(defaults.handler_stack_growth_threshold),
            restore_scratch_bytes: self
                .config
                .restore_scratch_bytes
                .unwrap_or(defaults.restore_scratch_bytes),
            max_pending_requests: self
                .config
                .max_pending_requests
                .unwrap_or(defaults.max_pending_requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_the_fields_set() {
        let cfg = RuntimeConfig::builder().max_pending_requests(16).build();
        assert_eq!(cfg.max_pending_requests, 16);
        assert_eq!(
            cfg.deadline_sweep_interval,
            RuntimeConfig::default().deadline_sweep_interval
        );
    }
}
