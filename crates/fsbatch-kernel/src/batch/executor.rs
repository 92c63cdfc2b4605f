//! Sequential batch execution.
//!
//! Steps run strictly in order; each starts only after the previous one has
//! completed. A failed step without `force` ends the batch and the remaining
//! descriptors are dropped unexecuted. Every step that runs gets its callback
//! invoked exactly once, and the batch produces exactly one final result.

use serde::Serialize;
use tracing::Instrument;

use super::descriptor::{Batch, Command, Descriptor};
use crate::session::{Session, SessionError, SessionResult};

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub command: String,
    pub force: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Final result: false iff an unforced step failed.
    pub success: bool,
    /// Steps that actually ran, in order.
    pub steps: Vec<StepRecord>,
    /// Descriptors dropped without running after a stopping failure.
    pub skipped: usize,
}

/// Runs batches against a session it borrows for the whole run.
pub struct BatchExecutor<'s> {
    session: &'s mut Session,
}

impl<'s> BatchExecutor<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self { session }
    }

    /// Run `batch` and return the final result.
    pub async fn run(&mut self, batch: Batch) -> bool {
        self.run_report(batch).await.success
    }

    /// Run `batch`, then hand the final result to `done`.
    pub async fn run_with(&mut self, batch: Batch, done: impl FnOnce(bool)) {
        let success = self.run(batch).await;
        done(success);
    }

    /// Run `batch` and describe what happened.
    #[tracing::instrument(skip(self, batch), name = "batch.run", fields(steps = batch.len()))]
    pub async fn run_report(&mut self, mut batch: Batch) -> BatchReport {
        let mut report = BatchReport::default();
        let mut index = 0;

        while let Some(Descriptor {
            command,
            force,
            callback,
        }) = batch.pop_front()
        {
            let name = command.name().to_string();
            let span = tracing::info_span!("batch.step", index, cmd = %name, force);
            let result = self.dispatch(command).instrument(span.clone()).await;

            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    span.in_scope(|| {
                        if force {
                            tracing::debug!(error = %e, "forced step failed, continuing");
                        } else {
                            tracing::warn!(error = %e, "step failed");
                        }
                    });
                    Some(e.to_string())
                }
            };
            let success = error.is_none();

            if let Some(callback) = callback {
                callback(success);
            }
            report.steps.push(StepRecord {
                index,
                command: name,
                force,
                success,
                error,
            });

            if !success && !force {
                report.skipped = batch.len();
                tracing::info!(skipped = report.skipped, "batch stopped");
                return report;
            }
            index += 1;
        }

        report.success = true;
        tracing::debug!(steps = report.steps.len(), "batch complete");
        report
    }

    async fn dispatch(&mut self, command: Command) -> SessionResult<()> {
        let session = &mut *self.session;
        match command {
            Command::Open {
                name,
                create,
                exclusive,
            } => session.open(&name, create, exclusive).await,
            Command::Read { kind, sink } => session.read(kind, &sink).await,
            Command::Write { data } => session.write(&data).await,
            Command::Truncate { size } => session.truncate(size).await,
            Command::Mkdir { name } => session.mkdir(&name).await,
            Command::Chdir { name } => session.chdir(&name).await,
            Command::Fetch {
                name,
                url,
                overwrite,
            } => session.fetch(&name, &url, overwrite).await.map(|_| ()),
            Command::Unknown(name) => Err(SessionError::UnknownCommand(name)),
        }
    }
}
