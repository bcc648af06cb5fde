//! The reporting stage. Policy translation is not modelled here; the default
//! reporter only confirms that the stage ran.

use crate::analyze::Evaluation;
use std::io::{self, Write};

pub const POLICY_CONFIRMATION: &str = "Policy recommendations generated.";

/// Turns an evaluation into operator-facing output.
pub trait Reporter {
    fn report(&self, evaluation: &Evaluation, out: &mut dyn Write) -> io::Result<()>;
}

/// Prints the fixed confirmation line.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyReporter;

impl Reporter for PolicyReporter {
    fn report(&self, evaluation: &Evaluation, out: &mut dyn Write) -> io::Result<()> {
        log::debug!(
            "Reporting on {} predictions",
            evaluation.predictions.len()
        );
        writeln!(out, "{POLICY_CONFIRMATION}")
    }
}
