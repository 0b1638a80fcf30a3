//! Process groups and training harnesses.
//!
//! Parallel state is carried by explicit handles instead of process-wide
//! globals. A [`Harness`] owns a [`ProcessGroup`]; whether the group still
//! needs bootstrapping is read from that handle alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use anyhow::Context;

/// Rank that assembles shared artifacts.
pub const COORDINATOR_RANK: usize = 0;

/// Collective operations across the ranks of one run.
pub trait ProcessGroup: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn is_initialized(&self) -> bool;

    /// Establish group state. Calling it on an initialized group is a no-op.
    fn initialize(&self) -> anyhow::Result<()>;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> anyhow::Result<()>;

    /// Distribute the coordinator's value to every rank.
    ///
    /// Only the coordinator's `value` is read; other ranks pass `None`.
    fn broadcast(&self, value: Option<String>) -> anyhow::Result<String>;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR_RANK
    }
}

/// Starts worker processes for a harness.
pub trait Launcher {
    fn launch(&mut self, payload: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()>;
}

/// Distributed-training harness built from a named strategy.
pub trait Harness {
    fn process_group(&self) -> &dyn ProcessGroup;

    /// Process launcher, if the strategy spawns workers.
    fn launcher(&mut self) -> Option<&mut dyn Launcher> {
        None
    }

    /// Set up the distributed environment (process groups, devices).
    fn setup_environment(&mut self) -> anyhow::Result<()>;
}

/// Bootstrap the harness's process group if it is not initialized yet.
///
/// The launcher runs with a no-op payload; only the side effect of bringing
/// the group up is needed. Returns `true` when setup ran.
pub fn ensure_process_group(harness: &mut dyn Harness) -> anyhow::Result<bool> {
    if harness.process_group().is_initialized() {
        return Ok(false);
    }

    tracing::debug!("process group not initialized, setting up environment");
    if let Some(launcher) = harness.launcher() {
        launcher.launch(&mut || Ok(()))?;
    }
    harness.setup_environment()?;
    Ok(true)
}

/// A group of one: the calling process is rank 0 of 1.
#[derive(Debug, Default)]
pub struct SingleProcessGroup {
    initialized: AtomicBool,
}

impl SingleProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group that reports itself as already initialized.
    pub fn initialized() -> Self {
        Self {
            initialized: AtomicBool::new(true),
        }
    }
}

impl ProcessGroup for SingleProcessGroup {
    fn rank(&self) -> usize {
        COORDINATOR_RANK
    }

    fn world_size(&self) -> usize {
        1
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn barrier(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn broadcast(&self, value: Option<String>) -> anyhow::Result<String> {
        value.context("coordinator must supply a value to broadcast")
    }
}

/// State shared by the ranks of a [`ThreadGroup`].
struct ThreadGroupShared {
    world_size: usize,
    barrier: Barrier,
    initialized: AtomicBool,
    slot: Mutex<Option<String>>,
}

/// In-process group where each rank runs on its own thread.
///
/// Every collective call must be made by all ranks, as with a real
/// communicator, or the callers block forever.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<ThreadGroupShared>,
}

impl ThreadGroup {
    /// Create handles for ranks `0..world_size`.
    pub fn create(world_size: usize) -> Vec<ThreadGroup> {
        assert!(world_size > 0, "world_size must be positive");
        let shared = Arc::new(ThreadGroupShared {
            world_size,
            barrier: Barrier::new(world_size),
            initialized: AtomicBool::new(false),
            slot: Mutex::new(None),
        });
        (0..world_size)
            .map(|rank| ThreadGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("rank", &self.rank)
            .field("world_size", &self.shared.world_size)
            .finish()
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.shared.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn barrier(&self) -> anyhow::Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn broadcast(&self, value: Option<String>) -> anyhow::Result<String> {
        if self.is_coordinator() {
            let value = value.context("coordinator must supply a value to broadcast")?;
            *self
                .shared
                .slot
                .lock()
                .map_err(|_| anyhow::anyhow!("broadcast slot poisoned"))? = Some(value);
        }
        self.shared.barrier.wait();

        let received = self
            .shared
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("broadcast slot poisoned"))?
            .clone();

        // Hold every rank until all have read the slot before it can be reused.
        self.shared.barrier.wait();
        received.context("broadcast slot empty")
    }
}

/// Harness for in-process groups: environment setup initializes the group.
#[derive(Debug)]
pub struct LocalHarness<G> {
    group: G,
}

impl<G: ProcessGroup> LocalHarness<G> {
    pub fn new(group: G) -> Self {
        Self { group }
    }

    pub fn group(&self) -> &G {
        &self.group
    }
}

impl<G: ProcessGroup> Harness for LocalHarness<G> {
    fn process_group(&self) -> &dyn ProcessGroup {
        &self.group
    }

    fn setup_environment(&mut self) -> anyhow::Result<()> {
        self.group.initialize()
    }
}
