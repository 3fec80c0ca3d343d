// Copyright 2025-2026 Waygate Devs
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

//! Background task management. Every watcher and timer of the engine runs as a named task in a
//! [`TaskRegistry`]; spawning under a name that is already taken supersedes the previous task,
//! so a crash-recovery resume never ends up with two watchers acting on the same swap. Refunds
//! are time-triggered only, [`wait_for_refund_time`] is the single place the engine waits for a
//! time lock to expire.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::swap::SwapId;

/// How waiting on a refund time ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The refund time was reached.
    Due,
    /// The wait was canceled.
    Canceled,
}

/// Wait until the given instant, returning immediately when it already passed. A closed
/// cancellation channel counts as canceled.
pub async fn wait_for_refund_time(
    deadline: DateTime<Utc>,
    cancel: &mut watch::Receiver<bool>,
) -> ScheduleOutcome {
    if *cancel.borrow_and_update() {
        return ScheduleOutcome::Canceled;
    }
    loop {
        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(remaining) => remaining,
            Err(_) => return ScheduleOutcome::Due,
        };
        tokio::select! {
            _ = sleep(remaining) => return ScheduleOutcome::Due,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return ScheduleOutcome::Canceled;
                }
            }
        }
    }
}

/// The background tasks one swap can run. Together with the swap identifier this names a task
/// slot in the registry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TaskKind {
    /// Watches the counterparty chain for the expected lock.
    PartyPaymentControl,
    /// Watches the local lock for the redeem that reveals the secret.
    OwnLockRedeemWatch,
    /// Watches the counterparty lock for a redeem by anyone on this party's behalf.
    PartyLockRedeemWatch,
    /// Tracks the confirmation of a broadcast redeem.
    RedeemConfirmation,
    /// Tracks the confirmation of a broadcast refund.
    RefundConfirmation,
    /// Sleeps until the local lock becomes refundable.
    RefundSchedule,
}

#[derive(Debug)]
struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Named background tasks, at most one per swap and [`TaskKind`]. Superseded and canceled tasks
/// are signaled through their cancellation channel and left to wind down on their own; they are
/// never aborted mid-operation.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<(SwapId, TaskKind), TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task under the given name, superseding any previous holder of the name. The task
    /// receives the cancellation receiver it must watch. Handles of tasks that already finished
    /// are pruned here, the registry holds nothing for a swap whose tasks all ran out.
    pub async fn spawn<F, Fut>(&self, swap_id: SwapId, kind: TaskKind, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, receiver) = watch::channel(false);
        let join = tokio::spawn(task(receiver));
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.join.is_finished());
        if let Some(previous) = tasks.insert((swap_id, kind), TaskHandle { cancel, join }) {
            let _ = previous.cancel.send(true);
        }
    }

    /// Returns `true` while the named task runs.
    pub async fn is_running(&self, swap_id: SwapId, kind: TaskKind) -> bool {
        self.tasks
            .lock()
            .await
            .get(&(swap_id, kind))
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
    }

    /// Signal every task of the swap to stop, without waiting for them.
    pub async fn cancel_swap(&self, swap_id: SwapId) {
        self.tasks.lock().await.retain(|(id, _), handle| {
            if *id == swap_id {
                let _ = handle.cancel.send(true);
                false
            } else {
                true
            }
        });
    }

    /// Signal every task to stop and wait until all of them finished.
    pub async fn shutdown(&self) {
        let handles: Vec<TaskHandle> = self
            .tasks
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &handles {
            let _ = handle.cancel.send(true);
        }
        for handle in handles {
            let _ = handle.join.await;
        }
    }
}
