//! Runs jobs: task ordering within a job, and a FIFO executor that runs one job at a time.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use facts::{JobId, ScanJob, ScanTask, Status, Store, TaskId, TaskKind};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{TaskError, TaskRunner};

/// Runs the tasks of one job, each as soon as its prerequisites are terminal.
#[derive(Clone, Debug)]
pub struct JobRunner {
    tasks: TaskRunner,
}

impl JobRunner {
    /// Run tasks with `tasks`.
    pub fn new(tasks: TaskRunner) -> Self {
        Self { tasks }
    }

    /// The store jobs live in.
    pub fn store(&self) -> &Arc<Store> {
        self.tasks.store()
    }

    /// Run a job to a terminal status.
    ///
    /// Tasks whose prerequisites are terminal run concurrently; a task whose prerequisite did not
    /// complete fails without running. Once every task is terminal the job becomes:
    /// - `canceled` if the cancel token was set,
    /// - otherwise the status of its fingerprint task,
    /// - or, for connect-only jobs, `completed` iff every connect task completed.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, job: JobId, cancel: CancellationToken) -> Result<ScanJob, TaskError> {
        let store = self.store().clone();
        let current = store.job(job)?;
        if current.status().is_terminal() {
            return Ok(current);
        }
        store.set_job_status(job, Status::Running, "Job is running.")?;
        info!(%job, tasks = current.tasks().len(), "job running");
        self.tasks.logs().clear(job).await;

        for task in store.tasks(job)? {
            if task.status() == Status::Created {
                store.set_task_status(task.id(), Status::Pending, "Task is pending.")?;
            }
        }

        let mut started = BTreeSet::<TaskId>::new();
        let mut running = JoinSet::new();
        loop {
            let tasks = store.tasks(job)?;
            for task in ready(&tasks, &started) {
                started.insert(task.id());
                let runner = self.tasks.clone();
                let cancel = cancel.clone();
                running.spawn(async move { runner.run(task, &cancel).await });
            }
            match running.join_next().await {
                Some(Ok(_)) => {}
                Some(Err(err)) => warn!(%job, "task panicked: {err}"),
                None => break,
            }
        }

        let tasks = store.tasks(job)?;
        let (status, message) = outcome(&tasks, cancel.is_cancelled());
        let finished = match store.set_job_status(job, status, message.clone()) {
            Ok(finished) => finished,
            Err(facts::Error::Transition { .. }) => {
                // A forced cancel already settled the job.
                return Ok(store.job(job)?);
            }
            Err(err) => return Err(err.into()),
        };
        info!(%job, %status, "job {status}: {message}");
        Ok(finished)
    }
}

/// Tasks not yet started whose prerequisites are all terminal.
fn ready(tasks: &[ScanTask], started: &BTreeSet<TaskId>) -> Vec<ScanTask> {
    let terminal = tasks
        .iter()
        .filter(|task| task.status().is_terminal())
        .map(ScanTask::id)
        .collect::<BTreeSet<_>>();
    tasks
        .iter()
        .filter(|task| !started.contains(&task.id()) && !task.status().is_terminal())
        .filter(|task| task.prerequisites().iter().all(|p| terminal.contains(p)))
        .cloned()
        .collect()
}

fn outcome(tasks: &[ScanTask], canceled: bool) -> (Status, String) {
    if canceled {
        return (Status::Canceled, String::from("Job was canceled."));
    }
    if let Some(fingerprint) = tasks.iter().find(|task| task.kind() == TaskKind::Fingerprint) {
        return match fingerprint.status() {
            Status::Completed => (Status::Completed, String::from("Job completed.")),
            Status::Canceled => (Status::Canceled, String::from("Job was canceled.")),
            _ => (
                Status::Failed,
                format!("Fingerprint task failed: {}", fingerprint.status_message()),
            ),
        };
    }
    let failed = tasks.iter().filter(|task| task.status() != Status::Completed).count();
    if failed == 0 {
        (Status::Completed, String::from("Job completed."))
    } else {
        (Status::Failed, format!("{failed} of {} connect tasks did not complete.", tasks.len()))
    }
}

struct Shared {
    runner: JobRunner,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    finished: watch::Sender<Option<JobId>>,
}

impl Shared {
    fn tokens<R>(&self, op: impl FnOnce(&mut HashMap<JobId, CancellationToken>) -> R) -> R {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut tokens)
    }

    fn store(&self) -> &Store {
        self.runner.store()
    }

    /// Settle every non-terminal task of a job, then the job, as canceled.
    fn force_cancel(&self, job: JobId) -> Result<ScanJob, TaskError> {
        let store = self.store();
        for task in store.tasks(job)? {
            if !task.status().is_terminal() {
                if let Err(err) = store.set_task_status(task.id(), Status::Canceled, TaskError::Canceled.to_string()) {
                    warn!(task = %task.id(), "cancel task: {err}");
                }
            }
        }
        let job = match store.set_job_status(job, Status::Canceled, "Job was canceled.") {
            Ok(job) => job,
            Err(facts::Error::Transition { .. }) => store.job(job)?,
            Err(err) => return Err(err.into()),
        };
        self.finished.send_replace(Some(job.id()));
        Ok(job)
    }
}

/// Executes submitted jobs one at a time, in submission order.
///
/// Cloning the executor shares its queue.
#[derive(Clone)]
pub struct JobExecutor {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<JobId>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor").finish_non_exhaustive()
    }
}

impl JobExecutor {
    /// Start the executor's worker on the current runtime.
    ///
    /// The worker stops once every clone of the executor is dropped and the queue drains.
    pub fn start(runner: JobRunner) -> (Self, JoinHandle<()>) {
        let (queue, mut jobs) = mpsc::unbounded_channel::<JobId>();
        let (finished, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            runner,
            tokens: Mutex::new(HashMap::new()),
            finished,
        });

        let worker = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(job) = jobs.recv().await {
                    let Some(cancel) = shared.tokens(|tokens| tokens.get(&job).cloned()) else {
                        continue;
                    };
                    if cancel.is_cancelled() {
                        shared.tokens(|tokens| tokens.remove(&job));
                        continue;
                    }
                    if let Err(err) = shared.runner.run(job, cancel).await {
                        warn!(%job, "run job: {err}");
                        if let Err(err) = shared.store().set_job_status(job, Status::Failed, err.to_string()) {
                            warn!(%job, "record job failure: {err}");
                        }
                    }
                    shared.tokens(|tokens| tokens.remove(&job));
                    shared.finished.send_replace(Some(job));
                }
                info!("job executor stopped");
            })
        };

        (Self { shared, queue }, worker)
    }

    /// The store jobs live in.
    pub fn store(&self) -> &Store {
        self.shared.store()
    }

    /// Queue a job.
    pub fn submit(&self, job: JobId) -> Result<ScanJob, TaskError> {
        let pending = self.store().set_job_status(job, Status::Pending, "Job is pending.")?;
        self.shared.tokens(|tokens| tokens.insert(job, CancellationToken::new()));
        if self.queue.send(job).is_err() {
            self.shared.tokens(|tokens| tokens.remove(&job));
            let message = "Job executor is not running.";
            self.store().set_job_status(job, Status::Failed, message)?;
            return Err(TaskError::Validation(String::from(message)));
        }
        info!(%job, "job queued");
        Ok(pending)
    }

    /// Cancel a job.
    ///
    /// Canceling a terminal job changes nothing. A queued job is canceled immediately.
    /// A running job is signaled, then given the configured drain timeout to settle
    /// before its remaining tasks are marked canceled.
    pub async fn cancel(&self, job: JobId) -> Result<ScanJob, TaskError> {
        let current = self.store().job(job)?;
        if current.status().is_terminal() {
            return Ok(current);
        }

        let token = self.shared.tokens(|tokens| tokens.get(&job).cloned());
        if let Some(token) = &token {
            token.cancel();
        }
        info!(%job, status = %current.status(), "cancel requested");

        if current.status() != Status::Running {
            return self.shared.force_cancel(job);
        }

        let drain = self.shared.runner.tasks.settings().drain_timeout();
        match timeout(drain, self.wait(job)).await {
            Ok(settled) => settled,
            Err(_) => {
                warn!(%job, "tasks did not drain within {} seconds", drain.as_secs());
                self.shared.force_cancel(job)
            }
        }
    }

    /// Wait until a job is terminal.
    pub async fn wait(&self, job: JobId) -> Result<ScanJob, TaskError> {
        let mut finished = self.shared.finished.subscribe();
        loop {
            let current = self.store().job(job)?;
            if current.status().is_terminal() {
                return Ok(current);
            }
            if finished.changed().await.is_err() {
                return Ok(self.store().job(job)?);
            }
        }
    }

    /// Queue a job and wait for it to finish.
    pub async fn run_to_completion(&self, job: JobId) -> Result<ScanJob, TaskError> {
        self.submit(job)?;
        self.wait(job).await
    }
}
