//! Waits that always watch for platform failures.
//!
//! [`ExpectEngine::wait`] puts the baseline failure signatures and the
//! disconnect notices in front of the caller's patterns as a priority group,
//! so a failure that shows up in the same output as the caller's pattern is
//! never missed.

use std::time::Duration;

use log::{info, trace};

use crate::channel::{Console, MatchResult, Pattern, PatternSet, WaitOutcome};
use crate::config::SessionSettings;
use crate::error::{Result, SessionError};
use crate::fault::{self, FaultClassifier};
use crate::system::SystemHandle;

/// Expect engine with the baseline and notices pre-compiled.
#[derive(Debug, Clone)]
pub struct ExpectEngine {
    /// Baseline signatures followed by the disconnect notices.
    priority: PatternSet,
    classifier: FaultClassifier,
}

impl ExpectEngine {
    /// Build an engine watching `notices` in addition to the baseline.
    pub fn new(notices: &[String], classifier: FaultClassifier) -> Self {
        let mut priority = fault::baseline().clone();
        for notice in notices {
            priority.push(Pattern::literal(notice));
        }
        Self {
            priority,
            classifier,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(
            &settings.disconnect_notices,
            FaultClassifier::from_settings(settings),
        )
    }

    /// Number of patterns placed ahead of the caller's.
    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    /// Wait for one of `patterns` on `console`.
    ///
    /// Returns `Matched` with an index into `patterns`, or `Timeout`/`Eof`.
    ///
    /// # Errors
    ///
    /// - [`Error::Fault`](crate::Error::Fault) if a baseline signature matched
    ///   first; `system` (if any) is demoted to unknown.
    /// - [`SessionError::ConsoleDisconnected`] if a disconnect notice matched.
    ///   The caller owns the stream and decides how to tear it down.
    /// - Transport errors from the underlying read.
    pub async fn wait(
        &self,
        console: &mut Console,
        patterns: &PatternSet,
        timeout: Duration,
        system: Option<&SystemHandle>,
    ) -> Result<WaitOutcome> {
        let set = PatternSet::layered(&self.priority, patterns);
        let outcome = console.read_until(&set, timeout).await?;

        let WaitOutcome::Matched(m) = outcome else {
            return Ok(outcome);
        };

        if let Some(kind) = fault::kind_for(m.index) {
            let fault = self.classifier.classify(kind, &m, console, system).await;
            return Err(fault.into());
        }
        if m.index < self.priority.len() {
            info!("{}: console disconnected: {}", console.target(), m.after);
            return Err(SessionError::ConsoleDisconnected { notice: m.label }.into());
        }
        let index = m.index - self.priority.len();
        trace!("{}: caller pattern {} matched", console.target(), index);
        Ok(WaitOutcome::Matched(MatchResult { index, ..m }))
    }
}

impl Default for ExpectEngine {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}
