//! Tasks scheduled by an instance on the host tick.
//!
//! Tasks only run while their instance is started and are all cancelled when
//! it stops.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use super::hooks::HookContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(pub u64);

pub type TaskAction = Rc<dyn Fn(&HookContext<'_>)>;

struct ScheduledTask {
    id: TaskId,
    ticks_until_run: u32,
    period: Option<u32>,
    action: TaskAction,
}

/// Per-instance task list.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Vec<ScheduledTask>,
    next_id: u64,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("tasks", &self.tasks.iter().map(|t| t.id).collect::<Vec<_>>())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` after `delay` ticks, repeating every `period` ticks
    /// when given.
    pub fn schedule(&mut self, delay: u32, period: Option<u32>, action: TaskAction) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.push(ScheduledTask {
            id,
            ticks_until_run: delay.max(1),
            period: period.map(|p| p.max(1)),
            action,
        });
        id
    }

    /// Cancel one task. Returns whether it was still scheduled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    /// Cancel every task, returning how many were scheduled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tasks.len();
        self.tasks.clear();
        count
    }

    /// Advance one tick and collect the actions due now, in schedule order.
    /// One-shot tasks are dropped once collected.
    pub fn due(&mut self) -> Vec<TaskAction> {
        let mut due = Vec::new();
        for task in &mut self.tasks {
            task.ticks_until_run -= 1;
            if task.ticks_until_run == 0 {
                due.push(Rc::clone(&task.action));
                if let Some(period) = task.period {
                    task.ticks_until_run = period;
                }
            }
        }
        self.tasks.retain(|t| t.ticks_until_run > 0);
        due
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
