//! Job correlation
//!
//! UDisks2 reports long-running operations as job objects that appear when the
//! operation starts and disappear when it ends. [`JobTracker`] pairs the two signals
//! per object path; [`JobManager`] runs a tracker on its own task and republishes the
//! results per operation kind.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{Event, ObjectPath};
use crate::properties::{FORMAT_ERASE, FORMAT_MKFS, JOB_INTERFACE, MOUNT_FS, UNMOUNT_FS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOperation {
    Erase,
    Mkfs,
    Mount,
    Unmount,
    Unknown,
}

impl JobOperation {
    pub fn parse(operation: &str) -> Self {
        match operation {
            FORMAT_ERASE => JobOperation::Erase,
            FORMAT_MKFS => JobOperation::Mkfs,
            MOUNT_FS => JobOperation::Mount,
            UNMOUNT_FS => JobOperation::Unmount,
            _ => JobOperation::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != JobOperation::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOperation::Erase => FORMAT_ERASE,
            JobOperation::Mkfs => FORMAT_MKFS,
            JobOperation::Mount => MOUNT_FS,
            JobOperation::Unmount => UNMOUNT_FS,
            JobOperation::Unknown => "unknown",
        }
    }
}

/// A tracked UDisks2 job, identified by its object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Latest addition seen for the job.
    pub event: Event,
    pub operation: JobOperation,
    /// Objects the job touches, in bus order.
    pub paths: Vec<ObjectPath>,
    pub was_completed: bool,
}

impl Job {
    fn from_event(event: Event) -> Self {
        let operation = JobOperation::parse(event.props.job_operation());
        let paths = affected_paths(&event);
        Self {
            event,
            operation,
            paths,
            was_completed: false,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.event.path
    }
}

fn affected_paths(event: &Event) -> Vec<ObjectPath> {
    event
        .props
        .get_formatted_paths()
        .into_iter()
        .map(ObjectPath::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Removal for a path that was never seen.
    NotTracked,
    /// Removal that did not take the job interface with it.
    JobInterfaceRetained,
    /// Addition whose operation is not one of the four tracked kinds.
    UnknownOperation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Started(Job),
    Completed(Job),
    Ignored(IgnoreReason),
}

/// Correlation table from job path to job. Holds at most one job per path.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: HashMap<ObjectPath, Job>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, event: Event) -> JobUpdate {
        if event.is_removal_event() {
            return self.complete(&event);
        }

        let job = match self.jobs.entry(event.path.clone()) {
            Entry::Occupied(entry) => {
                let job = entry.into_mut();
                let operation = JobOperation::parse(event.props.job_operation());
                // Property-only updates must not erase a known operation.
                if operation.is_known() {
                    job.operation = operation;
                    job.paths = affected_paths(&event);
                }
                job.event = event;
                job
            }
            Entry::Vacant(entry) => entry.insert(Job::from_event(event)),
        };

        if job.operation.is_known() {
            JobUpdate::Started(job.clone())
        } else {
            JobUpdate::Ignored(IgnoreReason::UnknownOperation)
        }
    }

    fn complete(&mut self, event: &Event) -> JobUpdate {
        if !self.jobs.contains_key(&event.path) {
            return JobUpdate::Ignored(IgnoreReason::NotTracked);
        }
        if !event.lost_interface(JOB_INTERFACE) {
            return JobUpdate::Ignored(IgnoreReason::JobInterfaceRetained);
        }
        match self.jobs.remove(&event.path) {
            Some(mut job) => {
                job.was_completed = true;
                JobUpdate::Completed(job)
            }
            None => JobUpdate::Ignored(IgnoreReason::NotTracked),
        }
    }

    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.jobs.contains_key(path)
    }

    pub fn get(&self, path: &ObjectPath) -> Option<&Job> {
        self.jobs.get(path)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

struct JobOutlets {
    erase: Sender<Job>,
    mkfs: Sender<Job>,
    unmount: Sender<Job>,
    mount: Sender<Job>,
}

impl JobOutlets {
    fn sender(&self, operation: JobOperation) -> Option<&Sender<Job>> {
        match operation {
            JobOperation::Erase => Some(&self.erase),
            JobOperation::Mkfs => Some(&self.mkfs),
            JobOperation::Unmount => Some(&self.unmount),
            JobOperation::Mount => Some(&self.mount),
            JobOperation::Unknown => None,
        }
    }
}

/// Single worker that owns a [`JobTracker`] and fans jobs out per kind.
///
/// Started and completed jobs travel on the same channel; `was_completed` tells
/// them apart. The worker stops when the incoming job channel closes, which in
/// turn closes the four outgoing channels.
pub struct JobManager {
    erase_jobs: Receiver<Job>,
    mkfs_jobs: Receiver<Job>,
    unmount_jobs: Receiver<Job>,
    mount_jobs: Receiver<Job>,
    worker: JoinHandle<()>,
}

impl JobManager {
    pub fn spawn(jobs: Receiver<Event>) -> Self {
        let (erase_tx, erase_jobs) = flume::bounded(0);
        let (mkfs_tx, mkfs_jobs) = flume::bounded(0);
        let (unmount_tx, unmount_jobs) = flume::bounded(0);
        let (mount_tx, mount_jobs) = flume::bounded(0);
        let outlets = JobOutlets {
            erase: erase_tx,
            mkfs: mkfs_tx,
            unmount: unmount_tx,
            mount: mount_tx,
        };

        let worker = tokio::spawn(run(jobs, outlets));
        Self {
            erase_jobs,
            mkfs_jobs,
            unmount_jobs,
            mount_jobs,
            worker,
        }
    }

    pub fn erase_jobs(&self) -> Receiver<Job> {
        self.erase_jobs.clone()
    }

    pub fn mkfs_jobs(&self) -> Receiver<Job> {
        self.mkfs_jobs.clone()
    }

    pub fn unmount_jobs(&self) -> Receiver<Job> {
        self.unmount_jobs.clone()
    }

    pub fn mount_jobs(&self) -> Receiver<Job> {
        self.mount_jobs.clone()
    }

    /// Waits for the worker; it ends once the incoming channel is closed.
    ///
    /// The manager's own receivers are dropped first so a send nobody will take
    /// fails instead of blocking the worker.
    pub async fn join(self) {
        let Self {
            erase_jobs,
            mkfs_jobs,
            unmount_jobs,
            mount_jobs,
            worker,
        } = self;
        drop((erase_jobs, mkfs_jobs, unmount_jobs, mount_jobs));
        if let Err(e) = worker.await {
            warn!("Job manager worker ended abnormally: {}", e);
        }
    }
}

async fn run(jobs: Receiver<Event>, outlets: JobOutlets) {
    let mut tracker = JobTracker::new();
    while let Ok(event) = jobs.recv_async().await {
        let path = event.path.clone();
        let job = match tracker.process(event) {
            JobUpdate::Started(job) | JobUpdate::Completed(job) => job,
            JobUpdate::Ignored(reason) => {
                debug!(path = %path, ?reason, "Job event ignored");
                continue;
            }
        };

        debug!(
            path = %path,
            operation = job.operation.as_str(),
            completed = job.was_completed,
            "Publishing job"
        );
        let Some(sender) = outlets.sender(job.operation) else {
            continue;
        };
        if sender.send_async(job).await.is_err() {
            debug!(path = %path, "Job channel has no receivers");
        }
    }
    debug!("Job channel closed, stopping job manager");
}
