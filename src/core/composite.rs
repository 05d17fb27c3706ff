//! Composite scheduler: several member schedulers behind one posting interface.
//!
//! Posts are spread across members by a [`PostPolicy`]. On construction each
//! member receives the other members' stealable queues as steal sources, in
//! member index order, so an idle worker in one member pulls work from a busy
//! one. Queues without steal support are left out of the scan.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::diagnostics::DiagnosticsSnapshot;
use crate::core::queue::JobQueue;
use crate::core::scheduler::{
    Scheduler, SchedulerHandle, SchedulerState, ShutdownMode, StateCell,
};
use crate::core::{Job, SchedulerError};

/// How a composite picks the member for a post without a placement hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostPolicy {
    /// Cycle through members in index order.
    #[default]
    RoundRobin,
    /// Member with the smallest total queue depth; ties go to the lower index.
    LeastLoaded,
}

/// Aggregation of member schedulers.
pub struct CompositeScheduler {
    name: String,
    members: Vec<SchedulerHandle>,
    policy: PostPolicy,
    next: AtomicUsize,
    state: StateCell,
}

impl CompositeScheduler {
    /// Combine `members` and wire cross-member stealing.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if `members` is empty.
    pub fn new(
        name: impl Into<String>,
        members: Vec<SchedulerHandle>,
        policy: PostPolicy,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        if members.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "composite scheduler needs at least one member".into(),
            ));
        }

        let member_queues: Vec<Vec<Arc<dyn JobQueue>>> =
            members.iter().map(|m| m.queues()).collect();
        for (i, member) in members.iter().enumerate() {
            let sources: Vec<Arc<dyn JobQueue>> = member_queues
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, queues)| queues.iter().cloned())
                .filter(|q| q.supports_steal())
                .collect();
            debug!(
                composite = %name,
                member = %member.name(),
                sources = sources.len(),
                "wiring cross-member stealing"
            );
            member.attach_steal_sources(sources);
        }

        let state = StateCell::new();
        state.set(SchedulerState::Running);
        info!(composite = %name, members = members.len(), ?policy, "composite scheduler created");

        Ok(Self {
            name,
            members,
            policy,
            next: AtomicUsize::new(0),
            state,
        })
    }

    /// Create the composite and wrap it in a strong handle.
    ///
    /// # Errors
    ///
    /// Same as [`CompositeScheduler::new`].
    pub fn spawn(
        name: impl Into<String>,
        members: Vec<SchedulerHandle>,
        policy: PostPolicy,
    ) -> Result<SchedulerHandle, SchedulerError> {
        Self::new(name, members, policy).map(SchedulerHandle::new)
    }

    /// Member schedulers in index order.
    #[must_use]
    pub fn members(&self) -> &[SchedulerHandle] {
        &self.members
    }

    /// Posting policy in effect.
    #[must_use]
    pub const fn policy(&self) -> PostPolicy {
        self.policy
    }

    fn pick(&self, priority: usize) -> &SchedulerHandle {
        let count = self.members.len();
        if priority > 0 {
            return &self.members[(priority - 1) % count];
        }
        match self.policy {
            PostPolicy::RoundRobin => {
                &self.members[self.next.fetch_add(1, Ordering::Relaxed) % count]
            }
            PostPolicy::LeastLoaded => self
                .members
                .iter()
                .enumerate()
                .min_by_key(|(idx, m)| (m.queue_sizes().iter().sum::<usize>(), *idx))
                .map_or(&self.members[0], |(_, m)| m),
        }
    }
}

impl Scheduler for CompositeScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, job: Job) -> Result<(), SchedulerError> {
        self.post_with_priority(job, 0)
    }

    fn post_with_priority(&self, job: Job, priority: usize) -> Result<(), SchedulerError> {
        if self.state.get() != SchedulerState::Running {
            return Err(SchedulerError::ShutDown(self.name.clone()));
        }
        self.pick(priority).post(job)
    }

    fn queue_sizes(&self) -> Vec<usize> {
        self.members.iter().flat_map(|m| m.queue_sizes()).collect()
    }

    fn request_shutdown(&self, mode: ShutdownMode) {
        self.state
            .transition(SchedulerState::Running, SchedulerState::ShutdownRequested);
        for member in &self.members {
            member.request_shutdown(mode);
        }
    }

    fn join(&self) {
        self.state
            .transition(SchedulerState::Running, SchedulerState::ShutdownRequested);
        for member in &self.members {
            member.join();
        }
        self.state.set(SchedulerState::Joined);
    }

    fn state(&self) -> SchedulerState {
        self.state.get()
    }

    fn worker_count(&self) -> usize {
        self.members.iter().map(|m| m.worker_count()).sum()
    }

    fn thread_ids(&self) -> Vec<ThreadId> {
        self.members.iter().flat_map(|m| m.thread_ids()).collect()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.members
            .iter()
            .fold(DiagnosticsSnapshot::default(), |mut acc, m| {
                acc.merge(m.diagnostics());
                acc
            })
    }

    fn queues(&self) -> Vec<Arc<dyn JobQueue>> {
        self.members.iter().flat_map(|m| m.queues()).collect()
    }

    fn attach_steal_sources(&self, sources: Vec<Arc<dyn JobQueue>>) {
        // Nested composite: the outer sources come after the sibling members.
        let own: Vec<Vec<Arc<dyn JobQueue>>> = self.members.iter().map(|m| m.queues()).collect();
        for (i, member) in self.members.iter().enumerate() {
            let mut scan: Vec<Arc<dyn JobQueue>> = own
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, queues)| queues.iter().cloned())
                .collect();
            scan.extend(sources.iter().cloned());
            member.attach_steal_sources(scan);
        }
    }
}

impl Drop for CompositeScheduler {
    fn drop(&mut self) {
        // Members may outlive the composite; stop them stealing from each other.
        for member in &self.members {
            member.attach_steal_sources(Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::core::queue::QueueKind;
    use crate::core::ThreadPoolScheduler;

    fn member(name: &str, queue: QueueKind) -> SchedulerHandle {
        ThreadPoolScheduler::spawn(SchedulerConfig::single_threaded(name).with_queue(queue)).unwrap()
    }

    #[test]
    fn test_priority_hint_targets_member() {
        let a = member("a", QueueKind::Growable);
        let b = member("b", QueueKind::Growable);
        let composite =
            CompositeScheduler::new("ab", vec![a.clone(), b.clone()], PostPolicy::RoundRobin).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for hint in [1usize, 2, 3] {
            let tx = tx.clone();
            composite
                .post_with_priority(
                    Job::new(move || {
                        tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
                    }),
                    hint,
                )
                .unwrap();
        }
        composite.join();
        let mut names: Vec<_> = rx.try_iter().flatten().collect();
        names.sort();
        assert_eq!(names, vec!["a-0", "a-0", "b-0"]);
    }

    #[test]
    fn test_least_loaded_picks_shallowest_member() {
        let a = member("busy", QueueKind::Growable);
        let b = member("idle", QueueKind::Growable);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        a.post_fn(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        // Pinned so the idle member cannot steal it once stealing is wired.
        a.post(Job::new(|| {}).pinned()).unwrap();

        let composite =
            CompositeScheduler::new("ll", vec![a.clone(), b.clone()], PostPolicy::LeastLoaded).unwrap();
        assert!(composite.pick(0).ptr_eq(&b));
        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_queue_sizes_concatenate_members() {
        let composite = CompositeScheduler::new(
            "sizes",
            vec![member("x", QueueKind::Growable), member("y", QueueKind::Stealing)],
            PostPolicy::default(),
        )
        .unwrap();
        assert_eq!(composite.queue_sizes().len(), 2);
        assert_eq!(composite.worker_count(), 2);
        assert_eq!(composite.thread_ids().len(), 2);
        composite.request_shutdown(ShutdownMode::Drain);
        assert!(composite.post(Job::new(|| {})).is_err());
    }

    #[test]
    fn test_empty_composite_rejected() {
        let err = CompositeScheduler::new("none", Vec::new(), PostPolicy::RoundRobin).err();
        assert!(matches!(err, Some(SchedulerError::InvalidConfig(_))));
    }
}
