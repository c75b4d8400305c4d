//! Bundle processing pipeline.
//!
//! A loaded bundle passes through an ordered list of [`Mutator`]s before it
//! is planned. Each mutator takes the tree by value and hands back a new
//! one together with diagnostics and a [`Control`] signal that decides
//! whether the remaining mutators run.

mod mutators;

use tracing::{debug, info, warn};

use crate::context::DeployContext;
use crate::diag::{Diagnostic, Diagnostics, Severity};
use crate::dyn_value::Value;
use crate::error::{ConfigError, Result};

pub use mutators::{ResolveVariables, SelectTarget, ValidateResources};

/// What happens after a mutator returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Run the next mutator.
    Continue,
    /// Skip the remaining mutators; the tree is still usable.
    StopSequence,
    /// The tree is unusable.
    Abort,
}

/// Result of one mutator.
#[derive(Debug, Clone)]
pub struct MutatorOutput {
    /// The transformed tree.
    pub tree: Value,
    /// Problems found.
    pub diagnostics: Diagnostics,
    /// Whether to go on.
    pub control: Control,
}

impl MutatorOutput {
    /// Passes `tree` on with no diagnostics.
    #[must_use]
    pub fn proceed(tree: Value) -> Self {
        Self {
            tree,
            diagnostics: Diagnostics::new(),
            control: Control::Continue,
        }
    }

    /// Stops the pipeline because of `diagnostic`.
    #[must_use]
    pub fn abort(tree: Value, diagnostic: Diagnostic) -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(diagnostic);
        Self {
            tree,
            diagnostics,
            control: Control::Abort,
        }
    }

    /// Adds diagnostics.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }
}

/// One step of the pipeline.
pub trait Mutator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Transforms `tree`.
    fn apply(&self, tree: Value, ctx: &DeployContext) -> MutatorOutput;
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The final tree.
    pub tree: Value,
    /// Diagnostics of every mutator that ran, in order.
    pub diagnostics: Diagnostics,
    /// How the run ended.
    pub control: Control,
    /// Mutator that stopped or aborted the run.
    pub stopped_by: Option<&'static str>,
}

impl PipelineOutput {
    /// True when a mutator aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.control == Control::Abort
    }

    /// Returns the tree, or the first error when the run aborted.
    ///
    /// # Errors
    ///
    /// Fails when a mutator aborted or reported an error.
    pub fn into_tree(self) -> Result<Value> {
        if !self.is_aborted() && !self.diagnostics.has_errors() {
            return Ok(self.tree);
        }
        let errors: Vec<&Diagnostic> = self.diagnostics.of(Severity::Error).collect();
        let message = match errors.as_slice() {
            [] => format!("bundle processing aborted by {}", self.stopped_by.unwrap_or("a mutator")),
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first}\n(and {} more error(s))", rest.len()),
        };
        Err(ConfigError::ValidationError {
            message,
            field: errors.first().and_then(|d| d.paths.first()).map(ToString::to_string),
        }
        .into())
    }
}

/// An ordered list of mutators.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Mutator>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The steps every deployment runs: target selection, variable
    /// resolution and resource validation.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .then(SelectTarget)
            .then(ResolveVariables)
            .then(ValidateResources)
    }

    /// Appends a mutator.
    #[must_use]
    pub fn then(mut self, mutator: impl Mutator + 'static) -> Self {
        self.steps.push(Box::new(mutator));
        self
    }

    /// Number of mutators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when there are no mutators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the mutators in order until one stops or aborts.
    #[must_use]
    pub fn run(&self, mut tree: Value, ctx: &DeployContext) -> PipelineOutput {
        let mut diagnostics = Diagnostics::new();

        for step in &self.steps {
            debug!("Running mutator {}", step.name());
            let output = step.apply(tree, ctx);
            tree = output.tree;
            for diagnostic in output.diagnostics {
                if diagnostic.severity == Severity::Warning {
                    warn!("{}: {}", step.name(), diagnostic.summary);
                }
                diagnostics.push(diagnostic);
            }

            match output.control {
                Control::Continue => {}
                Control::StopSequence => {
                    info!("Mutator {} ended the sequence early", step.name());
                    return PipelineOutput {
                        tree,
                        diagnostics,
                        control: Control::StopSequence,
                        stopped_by: Some(step.name()),
                    };
                }
                Control::Abort => {
                    return PipelineOutput {
                        tree,
                        diagnostics,
                        control: Control::Abort,
                        stopped_by: Some(step.name()),
                    };
                }
            }
        }

        PipelineOutput {
            tree,
            diagnostics,
            control: Control::Continue,
            stopped_by: None,
        }
    }
}
