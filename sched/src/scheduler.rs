use std::thread;

use crossbeam_channel::unbounded;

use crate::{Error, JobLauncher, JobOutcome, OpResult, OpStatus, Operation};

/// Bounded-concurrency executor for operations.
///
/// All operations submitted in one `run` call may execute in parallel, up to
/// `max_procs` in flight at once; excess submissions wait in the queue until
/// a worker frees up. `run` blocks until every submitted operation reaches a
/// terminal state.
///
/// A job that *fails* is recorded in its result and never aborts sibling
/// operations; abort policy belongs to the control loop. A job launch that
/// errors *abnormally* (spawn failure, unreadable verification output) is
/// fatal and surfaces as an `Err` after the remaining in-flight operations
/// finish.
pub struct Scheduler {
    launcher: Box<dyn JobLauncher>,
    max_procs: usize,
}

impl Scheduler {
    pub fn new(launcher: Box<dyn JobLauncher>, max_procs: usize) -> Self {
        Self {
            launcher,
            max_procs: max_procs.max(1),
        }
    }

    /// Execute operations and block until all are terminal.
    ///
    /// Operations flagged as resumed are not launched at all: they complete
    /// immediately as `Skipped`, reproducing the output-file mapping their
    /// original run produced.
    pub fn run(&self, ops: Vec<Operation>) -> Result<Vec<OpResult>, Error> {
        let mut results: Vec<Option<OpResult>> = Vec::with_capacity(ops.len());
        results.resize_with(ops.len(), || None);

        let (task_tx, task_rx) = unbounded::<(usize, Operation)>();
        let (res_tx, res_rx) = unbounded::<(usize, Result<OpResult, Error>)>();

        let mut n_queued = 0;
        for (i, op) in ops.into_iter().enumerate() {
            if op.resumed {
                log::info!("{} already completed in a previous run; skipping", op.label());
                results[i] = Some(terminal(op, OpStatus::Skipped, None));
            } else {
                task_tx.send((i, op)).expect("operation queue closed");
                n_queued += 1;
            }
        }
        drop(task_tx);

        if n_queued > 0 {
            let workers = self.max_procs.min(n_queued);
            log::debug!("dispatching {n_queued} operations across {workers} workers");
            thread::scope(|s| {
                for _ in 0..workers {
                    let task_rx = task_rx.clone();
                    let res_tx = res_tx.clone();
                    s.spawn(move || {
                        while let Ok((i, op)) = task_rx.recv() {
                            let res = self
                                .launcher
                                .launch(&op)
                                .map(|outcome| finish(op, outcome));
                            res_tx.send((i, res)).expect("result queue closed");
                        }
                    });
                }
            });
        }
        drop(res_tx);

        // workers are joined; the first abnormal launch error fails the run:
        for (i, res) in res_rx {
            results[i] = Some(res?);
        }

        Ok(results.into_iter().map(|r| r.expect("missing result")).collect())
    }
}

fn finish(op: Operation, outcome: JobOutcome) -> OpResult {
    let status = if outcome.success {
        OpStatus::Succeeded
    } else {
        log::error!("{} failed", op.label());
        OpStatus::Failed
    };
    terminal(op, status, outcome.verify_ok)
}

fn terminal(op: Operation, status: OpStatus, verify_ok: Option<bool>) -> OpResult {
    OpResult {
        name: op.name,
        stage: op.stage,
        direction: op.direction,
        status,
        verify_ok,
        outputs: op.outputs,
    }
}
