use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::check_slot;
use super::ClusterAdmin;
use crate::metadata::decode_record;
use crate::metadata::slot_key;
use crate::metadata::MetadataStore;
use crate::metadata::Slot;
use crate::network::BackendClient;
use crate::network::Dialer;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::protocol::ErrorCode;
use crate::utils::time::get_now_as_u64_millis;
use crate::BackendError;
use crate::MigrationError;
use crate::Result;

const MAX_COPY_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One request to move a slot from `source` to `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: u64,
    pub slot_id: u32,
    pub source: String,
    pub target: String,
    pub status: TaskStatus,
    /// Milliseconds since the epoch
    pub created_at: u64,
    pub end_at: Option<u64>,
    pub error: Option<String>,
}

impl MigrationTask {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// Copies a slot to a new owner while proxies keep serving it.
///
/// The slot is flipped to MIGRATING first, so from then on the router writes
/// to the target and reads fall back to the source. Keys are copied with
/// WRITE_NX, which never clobbers a value written through the proxy during the
/// copy, and removed from the source afterwards. The final flip back to
/// NORMAL hands the slot to the target.
///
/// A failed run leaves the slot MIGRATING and both owners keep serving it.
/// Creating a new task for the same slot and target resumes from there.
pub struct Migrator {
    store: Arc<dyn MetadataStore>,
    admin: ClusterAdmin,
    dialer: Arc<dyn Dialer>,
    tasks: Mutex<BTreeMap<u64, MigrationTask>>,
    next_id: AtomicU64,
    queue: Mutex<Option<mpsc::UnboundedSender<u64>>>,
}

impl Migrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            admin: ClusterAdmin::new(store.clone()),
            store,
            dialer,
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            queue: Mutex::new(None),
        }
    }

    /// Validates the move and records it as PENDING. A slot left MIGRATING
    /// toward `target` by a failed run is accepted and resumed.
    pub async fn create_task(
        &self,
        slot_id: u32,
        target: &str,
    ) -> Result<MigrationTask> {
        check_slot(slot_id)?;
        let slot = Slot::fetch(self.store.as_ref(), slot_id)
            .await?
            .ok_or(MigrationError::SlotNotAssigned(slot_id))?;
        if self.has_open_task(slot_id) {
            return Err(MigrationError::AlreadyMigrating(slot_id).into());
        }
        if let Some(current) = slot.target() {
            if current != target {
                return Err(MigrationError::AlreadyMigrating(slot_id).into());
            }
            info!(slot_id, source = %slot.owner, target, "resuming interrupted migration");
        }
        if slot.owner == target {
            return Err(MigrationError::SameOwner {
                slot: slot_id,
                owner: slot.owner,
            }
            .into());
        }
        if self.admin.find_node(target).await?.is_none() {
            return Err(MigrationError::NodeNotRegistered(target.to_string()).into());
        }

        let task = MigrationTask {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            slot_id,
            source: slot.owner,
            target: target.to_string(),
            status: TaskStatus::Pending,
            created_at: get_now_as_u64_millis(),
            end_at: None,
            error: None,
        };
        info!(task_id = task.id, slot_id, source = %task.source, target, "migration task created");
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    pub fn task(
        &self,
        id: u64,
    ) -> Option<MigrationTask> {
        self.tasks.lock().get(&id).cloned()
    }

    /// Every task, newest first
    pub fn list_tasks(&self) -> Vec<MigrationTask> {
        self.tasks.lock().values().rev().cloned().collect()
    }

    fn has_open_task(
        &self,
        slot_id: u32,
    ) -> bool {
        self.tasks
            .lock()
            .values()
            .any(|task| task.slot_id == slot_id && !task.is_finished())
    }

    /// Runs a PENDING task to completion and returns its final record.
    /// Migration failures are recorded on the task, not returned.
    pub async fn run_task(
        &self,
        id: u64,
    ) -> Result<MigrationTask> {
        let task = {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(&id).ok_or(MigrationError::TaskNotFound(id))?;
            if task.status != TaskStatus::Pending {
                return Err(MigrationError::TaskNotPending {
                    id,
                    status: task.status.to_string(),
                }
                .into());
            }
            task.status = TaskStatus::Running;
            task.clone()
        };
        info!(task_id = id, slot_id = task.slot_id, "migration started");

        let outcome = self.migrate(&task).await;

        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(&id).ok_or(MigrationError::TaskNotFound(id))?;
        record.end_at = Some(get_now_as_u64_millis());
        match outcome {
            Ok(moved) => {
                record.status = TaskStatus::Done;
                info!(task_id = id, slot_id = task.slot_id, moved, "migration finished");
            }
            Err(e) => {
                record.status = TaskStatus::Failed;
                record.error = Some(e.to_string());
                error!(task_id = id, slot_id = task.slot_id, "migration failed: {}", e);
            }
        }
        Ok(record.clone())
    }

    /// Create and enqueue for the worker started by [`Migrator::spawn`]
    pub async fn submit(
        &self,
        slot_id: u32,
        target: &str,
    ) -> Result<MigrationTask> {
        let sender = self.queue.lock().clone().ok_or(MigrationError::WorkerStopped)?;
        let task = self.create_task(slot_id, target).await?;
        if sender.send(task.id).is_err() {
            let mut tasks = self.tasks.lock();
            if let Some(record) = tasks.get_mut(&task.id) {
                record.status = TaskStatus::Failed;
                record.error = Some(MigrationError::WorkerStopped.to_string());
                record.end_at = Some(get_now_as_u64_millis());
            }
            return Err(MigrationError::WorkerStopped.into());
        }
        Ok(task)
    }

    /// Starts the worker executing submitted tasks one at a time
    pub fn spawn(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.queue.lock() = Some(tx);

        let migrator = Arc::clone(self);
        tokio::spawn(async move {
            info!("Migration worker started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Migration worker shutting down");
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(id) => {
                            if let Err(e) = migrator.run_task(id).await {
                                warn!(task_id = id, "unable to run migration task: {}", e);
                            }
                        }
                        None => break,
                    },
                }
            }
            migrator.queue.lock().take();
        })
    }

    /// Returns the number of keys moved
    async fn migrate(
        &self,
        task: &MigrationTask,
    ) -> Result<usize> {
        let key = slot_key(task.slot_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(MigrationError::SlotNotAssigned(task.slot_id))?;
        let slot: Slot = decode_record(&key, &raw)?;
        if slot.owner != task.source {
            return Err(MigrationError::Conflict(task.slot_id).into());
        }

        let migrating = match slot.target() {
            Some(target) if target == task.target => raw,
            Some(_) => return Err(MigrationError::Conflict(task.slot_id).into()),
            None => {
                let migrating = Slot::migrating(task.slot_id, &task.source, &task.target).encode()?;
                if !self.store.compare_and_put(&key, Some(raw), migrating.clone()).await? {
                    return Err(MigrationError::Conflict(task.slot_id).into());
                }
                debug!(slot_id = task.slot_id, "slot marked migrating");
                migrating
            }
        };

        let source = self.dialer.dial(&task.source).await?;
        let target = match self.dialer.dial(&task.target).await {
            Ok(target) => target,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };
        let copied = copy_slot(task.slot_id, source.as_ref(), target.as_ref()).await;
        source.close();
        target.close();
        let moved = copied?;

        let normal = Slot::normal(task.slot_id, &task.target).encode()?;
        if !self.store.compare_and_put(&key, Some(migrating), normal).await? {
            return Err(MigrationError::Conflict(task.slot_id).into());
        }
        Ok(moved)
    }
}

fn expect_ok(response: BackendResponse) -> Result<BackendResponse> {
    match response.code {
        ErrorCode::NoError => Ok(response),
        _ => Err(BackendError::Server(response.msg).into()),
    }
}

/// Copies until a pass finds the source empty. Writes that resolved the slot
/// before it went MIGRATING can still land on the source after a SCAN.
async fn copy_slot(
    slot_id: u32,
    source: &dyn BackendClient,
    target: &dyn BackendClient,
) -> Result<usize> {
    let mut moved = 0;
    for pass in 1..=MAX_COPY_PASSES {
        let found = copy_pass(slot_id, source, target).await?;
        if found == 0 {
            return Ok(moved);
        }
        debug!(slot_id, pass, found, "copy pass finished");
        moved += found;
    }
    Err(MigrationError::Unsettled {
        slot: slot_id,
        passes: MAX_COPY_PASSES,
    }
    .into())
}

async fn copy_pass(
    slot_id: u32,
    source: &dyn BackendClient,
    target: &dyn BackendClient,
) -> Result<usize> {
    let listing = expect_ok(source.call(BackendRequest::Scan { slot: slot_id }).await?)?;
    let keys: Vec<String> = serde_json::from_str(&listing.msg)?;
    debug!(slot_id, keys = keys.len(), "copying slot");

    let mut moved = 0;
    for key in keys {
        let read = source.call(BackendRequest::Read { key: key.clone() }).await?;
        if read.is_not_found() {
            continue;
        }
        let value = expect_ok(read)?.msg;
        expect_ok(target.call(BackendRequest::WriteNx { key: key.clone(), value }).await?)?;
        expect_ok(source.call(BackendRequest::Delete { key }).await?)?;
        moved += 1;
    }
    Ok(moved)
}

impl fmt::Debug for Migrator {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("tasks", &self.tasks.lock().len())
            .field("running", &self.queue.lock().is_some())
            .finish()
    }
}
