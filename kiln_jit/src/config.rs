//! Translator configuration.

// =============================================================================
// Translator Configuration
// =============================================================================

/// Configuration for one [`Translator`](crate::Translator).
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Resolve operator methods at translation time when the left operand
    /// type is proven, guarded by a runtime type check.
    pub specialize_operators: bool,

    /// Treat exception regions whose handler precedes their start as fatal
    /// instead of skipping them.
    pub strict_exception_regions: bool,

    /// Upper bound on flow-solver visits, as a multiple of the instruction count.
    pub max_fixed_point_passes: usize,

    /// Log the solved entry state of every instruction at `trace` level.
    pub trace_states: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            specialize_operators: true,
            strict_exception_regions: false,
            max_fixed_point_passes: 64,
            trace_states: false,
        }
    }
}

impl TranslatorConfig {
    /// Configuration that rejects every questionable input.
    #[inline]
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict_exception_regions: true,
            ..Self::default()
        }
    }

    /// Route every operator through the generic protocol.
    #[inline]
    #[must_use]
    pub fn without_specialization(mut self) -> Self {
        self.specialize_operators = false;
        self
    }

    /// Enable per-instruction state tracing.
    #[inline]
    #[must_use]
    pub fn with_state_tracing(mut self) -> Self {
        self.trace_states = true;
        self
    }
}
