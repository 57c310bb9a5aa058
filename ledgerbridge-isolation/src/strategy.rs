//! Ordered fallback chain for creating the engine's root object.

use ledgerbridge_types::ClassId;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a strategy is asked to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiationRequest {
    pub class_id: Option<ClassId>,
    pub prog_id: String,
    /// The staged binary, when an isolation context names one.
    pub binary: Option<PathBuf>,
    pub context_active: bool,
}

/// Why a single strategy did not produce a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// OS error code (HRESULT), when the failure came from the OS.
    pub code: Option<i32>,
    pub message: String,
}

impl StrategyFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn os(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (0x{code:08X})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One way of turning a request into a live handle.
pub trait InstantiationStrategy {
    type Handle;

    fn name(&self) -> &'static str;

    fn instantiate(&self, request: &InstantiationRequest) -> Result<Self::Handle, StrategyFailure>;
}

/// A single entry of the attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: &'static str,
    /// `None` when the strategy succeeded.
    pub failure: Option<StrategyFailure>,
}

#[derive(Debug)]
pub struct InstantiationOutcome<H> {
    pub handle: Option<H>,
    pub attempts: Vec<Attempt>,
}

impl<H> InstantiationOutcome<H> {
    /// One line per failed attempt, for error messages.
    #[must_use]
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .filter_map(|a| a.failure.as_ref().map(|f| format!("{}: {f}", a.strategy)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct InstantiationChain<H> {
    strategies: Vec<Box<dyn InstantiationStrategy<Handle = H>>>,
}

impl<H> Default for InstantiationChain<H> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }
}

impl<H> InstantiationChain<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<S>(mut self, strategy: S) -> Self
    where
        S: InstantiationStrategy<Handle = H> + 'static,
    {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn push(&mut self, strategy: Box<dyn InstantiationStrategy<Handle = H>>) {
        self.strategies.push(strategy);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Tries each strategy in order and stops at the first handle.
    pub fn run(&self, request: &InstantiationRequest) -> InstantiationOutcome<H> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.instantiate(request) {
                Ok(handle) => {
                    info!(
                        strategy = strategy.name(),
                        prog_id = %request.prog_id,
                        "Engine object created"
                    );
                    attempts.push(Attempt {
                        strategy: strategy.name(),
                        failure: None,
                    });
                    return InstantiationOutcome {
                        handle: Some(handle),
                        attempts,
                    };
                }
                Err(failure) => {
                    warn!(
                        strategy = strategy.name(),
                        prog_id = %request.prog_id,
                        "Instantiation failed: {}",
                        failure
                    );
                    attempts.push(Attempt {
                        strategy: strategy.name(),
                        failure: Some(failure),
                    });
                }
            }
        }

        InstantiationOutcome {
            handle: None,
            attempts,
        }
    }
}

impl<H> fmt::Debug for InstantiationChain<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstantiationChain")
            .field("strategies", &self.names())
            .finish()
    }
}
