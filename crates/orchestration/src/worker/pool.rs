use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, info_span, warn};

use crate::config::SchedulerConfig;
use crate::model::{TaskExecution, WorkerCapabilities};
use crate::scheduler::Scheduler;
use crate::worker::{TaskExecutor, WorkerEvent};

pub struct WorkerPool {
    event_receiver: Receiver<WorkerEvent>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `config.worker_count` workers that execute every job kind.
    ///
    /// Only the worker count and poll interval are read from `config`. The
    /// failure policy is the one `scheduler` was built with.
    pub fn new(
        scheduler: Scheduler,
        executor: Arc<dyn TaskExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::with_capabilities(scheduler, executor, config, WorkerCapabilities::all())
    }

    /// Starts workers restricted to the given job kinds.
    ///
    /// # Panics
    /// Panics if `config.worker_count` is 0.
    pub fn with_capabilities(
        scheduler: Scheduler,
        executor: Arc<dyn TaskExecutor>,
        config: &SchedulerConfig,
        capabilities: WorkerCapabilities,
    ) -> Self {
        assert!(config.worker_count > 0, "worker_count must be > 0");
        let (event_sender, event_receiver) = unbounded::<WorkerEvent>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let poll_interval = config.poll_interval();

        let mut workers = Vec::with_capacity(config.worker_count);

        for worker_id in 0..config.worker_count {
            let ctx = WorkerContext {
                worker_id,
                scheduler: scheduler.clone(),
                executor: Arc::clone(&executor),
                capabilities: capabilities.clone(),
                events: event_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                poll_interval,
            };

            workers.push(thread::spawn(move || run_worker(ctx)));
        }

        info!("Started {} workers", config.worker_count);

        Self {
            event_receiver,
            workers,
            shutdown,
        }
    }

    pub fn try_recv_event(&self) -> Option<WorkerEvent> {
        self.event_receiver.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to finish its current task and exit. Call
    /// [`WorkerPool::shutdown`] first.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct WorkerContext {
    worker_id: usize,
    scheduler: Scheduler,
    executor: Arc<dyn TaskExecutor>,
    capabilities: WorkerCapabilities,
    events: Sender<WorkerEvent>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl WorkerContext {
    fn emit(&self, event: WorkerEvent) {
        // The pool owner may have dropped the receiver; events are best effort.
        let _ = self.events.send(event);
    }

    /// Sleeps for one poll interval in short steps so shutdown stays prompt.
    fn idle(&self) {
        let step = Duration::from_millis(50).min(self.poll_interval);
        let mut waited = Duration::ZERO;
        while waited < self.poll_interval && !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(step);
            waited += step;
        }
    }
}

fn run_worker(ctx: WorkerContext) {
    let worker_id = ctx.worker_id;
    debug!("Worker {} started", worker_id);

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let task = match ctx.scheduler.claim_next(&ctx.capabilities) {
            Ok(Some(task)) => task,
            Ok(None) => {
                ctx.idle();
                continue;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Claim failed");
                ctx.emit(WorkerEvent::Error {
                    worker_id,
                    message: e.to_string(),
                });
                ctx.idle();
                continue;
            }
        };

        let kind = task.kind();
        let _span = info_span!(
            "execute_task",
            worker_id,
            %kind,
            job_id = task.job_id,
            task_id = task.id
        )
        .entered();
        ctx.emit(WorkerEvent::Claimed {
            worker_id,
            kind,
            job_id: task.job_id,
            task_id: task.id,
        });

        let task = match ctx.scheduler.start_task(kind, task.id) {
            Ok(task) => task,
            Err(e) => {
                // The job was killed between claim and start.
                warn!(error = %e, "Task could not be started");
                ctx.emit(WorkerEvent::Error {
                    worker_id,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let execution: TaskExecution = ctx.executor.execute(&task);
        debug!(outcome = ?execution.outcome, "Task executed");

        match ctx
            .scheduler
            .complete_task(kind, task.id, execution.outcome, &execution.metrics)
        {
            Ok(report) => {
                ctx.emit(WorkerEvent::Completed {
                    worker_id,
                    kind,
                    job_id: task.job_id,
                    task_id: task.id,
                    outcome: execution.outcome,
                });
                if let Some(job) = report.finalized {
                    ctx.emit(WorkerEvent::JobFinalized {
                        kind,
                        job_id: job.id,
                        status: job.status,
                    });
                }
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!(error = %e, "Completion rejected");
                } else {
                    error!(error = %e, "Completion could not be recorded");
                }
                ctx.emit(WorkerEvent::Error {
                    worker_id,
                    message: e.to_string(),
                });
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
