// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Sequential task scheduler. A [`TaskRunner`] executes an ordered chain of tasks against a
//! model, persists the model after every mutating task and calls exactly one of its handlers
//! when the chain ends.
//!
//! ```text
//!  task 0 ──ok──► persist ──► task 1 ──ok──► ... ──► on_success
//!                               │
//!                              err ──► on_failure (remaining tasks are skipped)
//! ```
//!
//! A runner is consumed by [`TaskRunner::run`]: a chain cannot be executed twice. Resuming after
//! a restart builds a new chain from the persisted model.

use std::fmt;

use tracing::{debug, error, info};

use crate::Error;

/// One step of a chain, executed against the model `M`.
pub trait Task<M> {
    /// Name of the task, used in logs and failure reports.
    fn name(&self) -> &'static str;

    /// Run the task. An error stops the chain.
    fn run(&self, model: &mut M) -> Result<(), Error>;

    /// Return true if the task writes to the model and the model must be persisted after it.
    fn mutates(&self) -> bool {
        true
    }
}

/// A model the runner can persist after mutating tasks.
pub trait TaskModel {
    /// Persist the current state of the model.
    fn persist(&mut self) -> Result<(), Error>;
}

/// Report of a failed chain.
#[derive(Debug)]
pub struct TaskFailure {
    /// Name of the chain.
    pub chain: String,
    /// Name of the failing task.
    pub task: String,
    /// Position of the failing task in the chain.
    pub index: usize,
    /// Error raised by the task, or by the persistence hook after it.
    pub error: Error,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} failed at task #{} {}: {}",
            self.chain, self.index, self.task, self.error
        )
    }
}

impl From<TaskFailure> for Error {
    fn from(failure: TaskFailure) -> Self {
        Error::ChainFailed {
            chain: failure.chain,
            task: failure.task,
            source: Box::new(failure.error),
        }
    }
}

type SuccessHandler<'h, M> = Box<dyn FnOnce(&mut M) + 'h>;
type FailureHandler<'h, M> = Box<dyn FnOnce(&mut M, &TaskFailure) + 'h>;

/// Ordered chain of tasks with its completion handlers.
pub struct TaskRunner<'h, M, T> {
    name: String,
    tasks: Vec<T>,
    on_success: Option<SuccessHandler<'h, M>>,
    on_failure: Option<FailureHandler<'h, M>>,
}

impl<'h, M, T> TaskRunner<'h, M, T>
where
    M: TaskModel,
    T: Task<M>,
{
    /// Create a chain named `name` executing `tasks` in order.
    pub fn new(name: impl Into<String>, tasks: Vec<T>) -> Self {
        Self {
            name: name.into(),
            tasks,
            on_success: None,
            on_failure: None,
        }
    }

    /// Set the handler called once every task completed.
    pub fn on_success(mut self, handler: impl FnOnce(&mut M) + 'h) -> Self {
        self.on_success = Some(Box::new(handler));
        self
    }

    /// Set the handler called when a task fails.
    pub fn on_failure(mut self, handler: impl FnOnce(&mut M, &TaskFailure) + 'h) -> Self {
        self.on_failure = Some(Box::new(handler));
        self
    }

    /// Name of the chain.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks in the chain.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Return true if the chain has no task.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execute the chain against `model`.
    pub fn run(self, model: &mut M) -> Result<(), TaskFailure> {
        let Self {
            name,
            tasks,
            on_success,
            on_failure,
        } = self;

        for (index, task) in tasks.iter().enumerate() {
            debug!(chain = %name, task = task.name(), index, "Running task");
            let res = task.run(model).and_then(|()| {
                if task.mutates() {
                    model.persist()
                } else {
                    Ok(())
                }
            });
            if let Err(error) = res {
                let failure = TaskFailure {
                    chain: name,
                    task: task.name().to_string(),
                    index,
                    error,
                };
                error!(chain = %failure.chain, task = %failure.task, "{}", failure);
                if let Some(handler) = on_failure {
                    handler(model, &failure);
                }
                return Err(failure);
            }
        }

        info!(chain = %name, tasks = tasks.len(), "Chain completed");
        if let Some(handler) = on_success {
            handler(model);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::model;

    #[derive(Default)]
    struct Log {
        ran: Vec<&'static str>,
        persisted: usize,
        fail_persist: bool,
    }

    impl TaskModel for Log {
        fn persist(&mut self) -> Result<(), Error> {
            if self.fail_persist {
                return Err(model::Error::Missing("disk").into());
            }
            self.persisted += 1;
            Ok(())
        }
    }

    enum Step {
        Push(&'static str),
        Read(&'static str),
        Fail(&'static str),
    }

    impl Task<Log> for Step {
        fn name(&self) -> &'static str {
            match self {
                Step::Push(n) | Step::Read(n) | Step::Fail(n) => *n,
            }
        }

        fn run(&self, log: &mut Log) -> Result<(), Error> {
            match self {
                Step::Push(n) | Step::Read(n) => {
                    log.ran.push(*n);
                    Ok(())
                }
                Step::Fail(_) => Err(model::Error::Missing("peer key").into()),
            }
        }

        fn mutates(&self) -> bool {
            !matches!(self, Step::Read(_))
        }
    }

    #[test]
    fn runs_every_task_in_order() {
        let successes = Cell::new(0);
        let failures = Cell::new(0);
        let mut log = Log::default();
        let runner = TaskRunner::<Log, Step>::new(
            "chain",
            vec![Step::Push("a"), Step::Read("b"), Step::Push("c")],
        )
        .on_success(|_| successes.set(successes.get() + 1))
        .on_failure(|_, _| failures.set(failures.get() + 1));
        assert_eq!(runner.len(), 3);
        assert!(runner.run(&mut log).is_ok());
        assert_eq!(log.ran, vec!["a", "b", "c"]);
        // the read-only task is not followed by a persist
        assert_eq!(log.persisted, 2);
        assert_eq!(successes.get(), 1);
        assert_eq!(failures.get(), 0);
    }

    #[test]
    fn failure_stops_the_chain() {
        let successes = Cell::new(0);
        let failures = Cell::new(0);
        let mut log = Log::default();
        let failure = TaskRunner::<Log, Step>::new(
            "chain",
            vec![Step::Push("a"), Step::Fail("b"), Step::Push("c")],
        )
        .on_success(|_| successes.set(successes.get() + 1))
        .on_failure(|log: &mut Log, f| {
            assert_eq!(log.ran, vec!["a"]);
            assert_eq!(f.index, 1);
            failures.set(failures.get() + 1)
        })
        .run(&mut log)
        .unwrap_err();
        assert_eq!(log.ran, vec!["a"]);
        assert_eq!(failure.task, "b");
        assert_eq!(
            format!("{}", failure),
            "chain failed at task #1 b: Model error: Missing peer key in the process model"
        );
        assert_eq!(successes.get(), 0);
        assert_eq!(failures.get(), 1);

        let err: Error = failure.into();
        assert!(matches!(err.root(), Error::Model(_)));
    }

    #[test]
    fn persistence_error_fails_the_chain() {
        let mut log = Log {
            fail_persist: true,
            ..Default::default()
        };
        let failure = TaskRunner::<Log, Step>::new("chain", vec![Step::Push("a"), Step::Push("b")])
            .run(&mut log)
            .unwrap_err();
        assert_eq!(failure.index, 0);
        assert_eq!(log.ran, vec!["a"]);
    }

    #[test]
    fn empty_chain_succeeds() {
        let called = Cell::new(false);
        let mut log = Log::default();
        TaskRunner::<Log, Step>::new("empty", vec![])
            .on_success(|_| called.set(true))
            .run(&mut log)
            .unwrap();
        assert!(called.get());
    }
}
