use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use skel_core::TaskError;
use tracing::{debug, error, warn};

use super::family::TaskFamily;
use super::id::{IdSource, RandomIdSource, TaskIdentifier};
use super::stats::StatsHandle;
use super::types::TaskPriority;

/// Execution context handed to instructions.
///
/// Opaque to the scheduler. Workers build one per thread.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    worker: String,
}

impl Environment {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }
}

/// One pending step of a task's program.
///
/// An instruction may push further instructions, spawn children through
/// the task's family, or replace the task with a reborn copy. It must not
/// change the task's identity.
pub trait Instruction<T>: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "instruction"
    }

    fn execute(&self, env: &Environment, task: &mut Task<T>) -> Result<(), TaskError>;
}

/// An [`Instruction`] backed by a closure.
pub struct FnInstruction<F> {
    name: String,
    f: F,
}

impl<T, F> Instruction<T> for FnInstruction<F>
where
    F: Fn(&Environment, &mut Task<T>) -> Result<(), TaskError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, env: &Environment, task: &mut Task<T>) -> Result<(), TaskError> {
        (self.f)(env, task)
    }
}

/// Wrap a closure as a shareable instruction.
pub fn instruction_fn<T, F>(name: impl Into<String>, f: F) -> Arc<dyn Instruction<T>>
where
    T: 'static,
    F: Fn(&Environment, &mut Task<T>) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(FnInstruction {
        name: name.into(),
        f,
    })
}

/// A unit of work: a payload plus the program still to run on it.
pub struct Task<T> {
    payload: T,
    id: TaskIdentifier,
    priority: TaskPriority,
    stack: Vec<Arc<dyn Instruction<T>>>,
    family: TaskFamily<T>,
    stats: StatsHandle,
    exception: Option<TaskError>,
    tainted: bool,
}

impl<T> Task<T> {
    /// New root task with a random id and priority 0.
    pub fn new(payload: T) -> Self {
        Self::with_id_source(payload, Arc::new(RandomIdSource))
    }

    /// New root task whose id, and the ids of all its descendants, come
    /// from `ids`.
    pub fn with_id_source(payload: T, ids: Arc<dyn IdSource>) -> Self {
        let id = TaskIdentifier::new_root_with(ids.as_ref());
        Self::with_identity(payload, id, TaskPriority::default(), ids)
    }

    fn with_identity(
        payload: T,
        id: TaskIdentifier,
        priority: TaskPriority,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        let stats = StatsHandle::new();
        Self {
            payload,
            id,
            priority,
            stack: Vec::new(),
            family: TaskFamily::new(id, priority, stats.clone(), ids),
            stats,
            exception: None,
            tainted: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.set_priority(priority);
        self
    }

    pub fn with_instruction(mut self, instruction: Arc<dyn Instruction<T>>) -> Self {
        self.push_instruction(instruction);
        self
    }

    pub fn id(&self) -> &TaskIdentifier {
        &self.id
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Change the caller-assigned priority. Depth is left alone.
    pub fn set_priority(&mut self, priority: i32) {
        self.priority.priority = priority;
        self.family.set_parent(self.id, self.priority);
    }

    pub(crate) fn assign_identity(
        &mut self,
        id: TaskIdentifier,
        priority: TaskPriority,
        ids: Arc<dyn IdSource>,
    ) {
        self.id = id;
        self.priority = priority;
        self.family.set_parent(id, priority);
        self.family.set_id_source(ids);
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn set_payload(&mut self, payload: T) {
        self.payload = payload;
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn push_instruction(&mut self, instruction: Arc<dyn Instruction<T>>) {
        self.stack.push(instruction);
    }

    pub fn has_instruction(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn instruction_count(&self) -> usize {
        self.stack.len()
    }

    /// Names of pending instructions, bottom of the stack first.
    pub fn instruction_names(&self) -> Vec<&str> {
        self.stack.iter().map(|i| i.name()).collect()
    }

    pub fn family(&self) -> &TaskFamily<T> {
        &self.family
    }

    pub fn family_mut(&mut self) -> &mut TaskFamily<T> {
        &mut self.family
    }

    /// Build a child from `payload` and `instructions` (executed last to
    /// first) and queue it in this task's family.
    pub fn add_child(&mut self, payload: T, instructions: Vec<Arc<dyn Instruction<T>>>) {
        // Identity is assigned by the family; borrow ours until then.
        let mut child = Task::with_identity(payload, self.id, self.priority, self.family.id_source());
        child.stack = instructions;
        self.family.add_ready_child(child);
    }

    /// No children are queued or in flight.
    pub fn is_ready(&self) -> bool {
        !self.family.has_ready_child_task() && self.family.waiting_len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.is_ready() && !self.has_instruction()
    }

    /// Run the top instruction against this task.
    ///
    /// A failing instruction aborts the task and the task is still returned.
    /// `Err` means the instruction broke the identity contract; the pool
    /// cannot track the result and must panic.
    pub fn compute(mut self, env: &Environment) -> Result<Self, TaskError> {
        let Some(instruction) = self.stack.pop() else {
            return Ok(self);
        };
        let before = self.id;
        let stats = self.stats.clone();
        let started = Instant::now();
        let outcome = instruction.execute(env, &mut self);
        stats.record_computation(started.elapsed());

        if self.id.own_id != before.own_id || self.id.family_id != before.family_id {
            error!(
                instruction = instruction.name(),
                before = %before,
                after = %self.id,
                "instruction changed task identity"
            );
            return Err(TaskError::panic(format!(
                "instruction {} changed task identity {} -> {}",
                instruction.name(),
                before,
                self.id
            )));
        }

        if let Err(e) = outcome {
            debug!(task = %self.id, instruction = instruction.name(), error = %e, "instruction failed");
            self.abort(e);
        }
        Ok(self)
    }

    /// Same identity, priority, stats and program with a new payload and no
    /// children.
    pub fn reborn(&self, payload: T) -> Self {
        Self {
            payload,
            id: self.id,
            priority: self.priority,
            stack: self.stack.clone(),
            family: TaskFamily::new(
                self.id,
                self.priority,
                self.stats.clone(),
                self.family.id_source(),
            ),
            stats: self.stats.clone(),
            exception: None,
            tainted: false,
        }
    }

    /// Record the task's failure. Only the first one is kept.
    pub fn set_exception(&mut self, error: TaskError) {
        if let Some(existing) = &self.exception {
            warn!(task = %self.id, existing = %existing, ignored = %error, "task already failed");
            return;
        }
        self.exception = Some(error);
    }

    /// Fail the task and drop the work it has not handed out yet.
    pub fn abort(&mut self, error: TaskError) {
        self.set_exception(error);
        self.discard_pending();
    }

    /// Drop pending instructions and every unfinished child.
    pub(crate) fn discard_pending(&mut self) {
        self.stack.clear();
        self.family.discard_unfinished();
    }

    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn exception(&self) -> Option<&TaskError> {
        self.exception.as_ref()
    }

    pub fn taint(&mut self) {
        self.tainted = true;
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    /// Dispatch order. `Less` is served first.
    ///
    /// Higher priority, then lower family id, then deeper tasks, then lower
    /// parent id, then lower own id. The family id step is only an
    /// approximate ordering between lineages since ids are not counters.
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .priority
            .cmp(&self.priority.priority)
            .then_with(|| self.id.family_id.cmp(&other.id.family_id))
            .then_with(|| other.priority.intra_family.cmp(&self.priority.intra_family))
            .then_with(|| self.id.parent_id.cmp(&other.id.parent_id))
            .then_with(|| self.id.own_id.cmp(&other.id.own_id))
    }
}

impl<T: fmt::Debug> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("instructions", &self.instruction_names())
            .field("family", &self.family)
            .field("exception", &self.exception)
            .field("tainted", &self.tainted)
            .finish()
    }
}
