//! Slot tokens waiting for a job, and the set of jobs being executed.
use std::collections::{BTreeSet, VecDeque};

use parking_lot::Mutex;
use reel_model::{JobId, RequestRecording};
use tokio::sync::{Notify, oneshot};

/// A slot's open request for one job.
pub(crate) struct SlotToken {
    pub slot: usize,
    tx: oneshot::Sender<RequestRecording>,
}

impl SlotToken {
    pub fn new(slot: usize) -> (Self, oneshot::Receiver<RequestRecording>) {
        let (tx, rx) = oneshot::channel();
        (Self { slot, tx }, rx)
    }

    /// Hand the job to the waiting slot; gives the job back if the slot is gone.
    pub fn fulfill(self, job: RequestRecording) -> Result<(), RequestRecording> {
        self.tx.send(job)
    }

    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// FIFO of slot tokens shared by the slot loops and the connection loop.
#[derive(Default)]
pub(crate) struct PendingSlots {
    queue: Mutex<VecDeque<SlotToken>>,
    changed: Notify,
}

impl PendingSlots {
    pub fn push_back(&self, token: SlotToken) {
        self.queue.lock().push_back(token);
        self.changed.notify_one();
    }

    /// Put an unfulfilled token back so it is served before newer ones.
    pub fn push_front(&self, token: SlotToken) {
        self.queue.lock().push_front(token);
        self.changed.notify_one();
    }

    /// Wait for the oldest live token.
    pub async fn pop(&self) -> SlotToken {
        loop {
            let changed = self.changed.notified();
            {
                let mut queue = self.queue.lock();
                while let Some(token) = queue.pop_front() {
                    if !token.is_abandoned() {
                        return token;
                    }
                }
            }
            changed.await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Jobs accepted by a slot whose handling has not finished.
#[derive(Default)]
pub(crate) struct InFlight {
    jobs: Mutex<BTreeSet<JobId>>,
}

impl InFlight {
    pub fn insert(&self, job_id: JobId) {
        self.jobs.lock().insert(job_id);
    }

    pub fn remove(&self, job_id: &JobId) {
        self.jobs.lock().remove(job_id);
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        self.jobs.lock().iter().copied().collect()
    }
}
