use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::pool::{run_inline, WorkerPool};
use super::CommitMode;
use crate::engine::{check_op, Device, SceneId};
use crate::error::{Error, ErrorContext};
use crate::fault::FaultInjector;
use crate::mutation::{MutationConfig, MutationGenerator, SceneMode};
use crate::oracle::RayOracle;
use crate::runner::ErrorCounter;
use crate::sync::Barrier;
use crate::util::DetRng;
use crate::Result;

/// Everything a task borrows from the scenario that runs it.
#[derive(Clone, Copy)]
pub struct TaskEnv<'a> {
    /// Engine under test.
    pub device: &'a dyn Device,
    /// Tally shared by every worker.
    pub errors: &'a ErrorCounter,
    /// Monitors to install on new scenes.
    pub faults: Option<&'a FaultInjector>,
    /// Post-build liveness check.
    pub oracle: RayOracle,
    /// Mutation knobs.
    pub mutation: MutationConfig,
}

impl std::fmt::Debug for TaskEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnv")
            .field("errors", &self.errors.get())
            .field("faults", &self.faults.is_some())
            .field("mutation", &self.mutation)
            .finish_non_exhaustive()
    }
}

/// Per-task summary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskReport {
    /// Seed index of the task.
    pub scene_index: usize,
    /// Completed rendezvous per thread.
    pub rendezvous: Vec<usize>,
    /// Iterations whose oracle pass succeeded.
    pub verified: usize,
    /// Iterations abandoned after a mutation failure.
    pub abandoned: usize,
    /// Workers that panicked or failed to start.
    pub worker_failures: usize,
}

/// One unit of work: `scene_count` iterations over one task's scenes.
#[derive(Debug)]
pub struct RegressionTask {
    scene_index: usize,
    scene_count: usize,
    thread_count: usize,
    mode: SceneMode,
    commit: CommitMode,
    barrier: Barrier,
    num_active: AtomicUsize,
    abandoned: AtomicBool,
    scene: Mutex<Option<SceneId>>,
    rendezvous: Vec<AtomicUsize>,
    verified: AtomicUsize,
    abandoned_iterations: AtomicUsize,
}

impl RegressionTask {
    /// Creates a task. `Single` commit mode always runs one thread.
    #[must_use]
    pub fn new(
        scene_index: usize,
        scene_count: usize,
        thread_count: usize,
        mode: SceneMode,
        commit: CommitMode,
    ) -> Self {
        let thread_count = if commit.is_threaded() {
            thread_count.max(1)
        } else {
            1
        };
        Self {
            scene_index,
            scene_count,
            thread_count,
            mode,
            commit,
            barrier: Barrier::new(thread_count),
            num_active: AtomicUsize::new(1),
            abandoned: AtomicBool::new(false),
            scene: Mutex::new(None),
            rendezvous: (0..thread_count).map(|_| AtomicUsize::new(0)).collect(),
            verified: AtomicUsize::new(0),
            abandoned_iterations: AtomicUsize::new(0),
        }
    }

    /// Seed index.
    #[must_use]
    pub const fn scene_index(&self) -> usize {
        self.scene_index
    }

    /// Threads in the pool.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Runs every thread of the task to completion.
    pub fn run(&self, env: &TaskEnv<'_>) -> TaskReport {
        let span = tracing::info_span!(
            "regression_task",
            scene_index = self.scene_index,
            thread_count = self.thread_count,
            mode = self.mode.name(),
            commit = self.commit.name(),
        );
        let _entered = span.enter();

        let failures = if self.thread_count == 1 {
            run_inline(0, || ThreadRegressionTask::new(0, self).run(env))
                .into_iter()
                .collect()
        } else {
            WorkerPool::new(format!("regression-{}", self.scene_index)).run(
                self.thread_count,
                |index| {
                    let _entered = span.enter();
                    ThreadRegressionTask::new(index, self).run(env);
                },
                &|| self.barrier.break_barrier(),
            )
        };
        let worker_failures = failures.len();
        for failure in failures {
            let ctx = self.context(failure.thread_index(), None);
            env.errors.record(&failure.into_error().with_context(ctx));
        }
        // A driver that died mid-iteration leaves its scene behind.
        self.close_scene(env, self.context(0, None));

        TaskReport {
            scene_index: self.scene_index,
            rendezvous: self
                .rendezvous
                .iter()
                .map(|r| r.load(Ordering::SeqCst))
                .collect(),
            verified: self.verified.load(Ordering::SeqCst),
            abandoned: self.abandoned_iterations.load(Ordering::SeqCst),
            worker_failures,
        }
    }

    const fn context(&self, thread_index: usize, iteration: Option<usize>) -> ErrorContext {
        ErrorContext {
            scene_index: Some(self.scene_index),
            iteration,
            thread_index: Some(thread_index),
        }
    }

    fn open_scene(&self, env: &TaskEnv<'_>, selector: usize, ctx: ErrorContext) -> Option<SceneId> {
        let created = env.device.new_scene(self.mode.scene_flags(selector));
        if let Err(err) = check_op(env.device, "new_scene") {
            env.errors.record(&err.with_context(ctx));
            return None;
        }
        let scene = created?;
        if let Some(faults) = env.faults {
            faults.attach_scene(env.device, scene);
        }
        *self.scene.lock() = Some(scene);
        Some(scene)
    }

    fn close_scene(&self, env: &TaskEnv<'_>, ctx: ErrorContext) {
        let Some(scene) = self.scene.lock().take() else {
            return;
        };
        env.device.delete_scene(scene);
        if let Err(err) = check_op(env.device, "delete_scene") {
            env.errors.record(&err.with_context(ctx));
        }
    }

    fn schedule_rng(&self, iteration: usize, thread_index: usize) -> DetRng {
        let seed = self.mode.seed(self.scene_index, iteration);
        DetRng::from_index(seed ^ ((thread_index as u64 + 1) << 40))
    }
}

/// One worker's view of a [`RegressionTask`].
#[derive(Debug)]
pub struct ThreadRegressionTask<'t> {
    thread_index: usize,
    task: &'t RegressionTask,
}

impl<'t> ThreadRegressionTask<'t> {
    /// Creates the context of worker `thread_index` (0 is the driver).
    #[must_use]
    pub const fn new(thread_index: usize, task: &'t RegressionTask) -> Self {
        Self { thread_index, task }
    }

    /// Runs the worker loop. Errors are counted, never propagated.
    pub fn run(&self, env: &TaskEnv<'_>) {
        let _breaker = self.task.barrier.break_on_unwind();
        let result = if self.thread_index == 0 {
            self.drive(env)
        } else {
            self.assist(env)
        };
        if let Err(err) = result {
            tracing::warn!(thread_index = self.thread_index, error = %err, "worker left its loop");
            env.errors.record(&err.with_context(self.task.context(self.thread_index, None)));
        }
    }

    fn rendezvous(&self, iteration: usize) -> Result<()> {
        self.task
            .barrier
            .wait()
            .map_err(|e| Error::from(e).with_context(self.task.context(self.thread_index, Some(iteration))))?;
        self.task.rendezvous[self.thread_index].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Commits according to the task's mode and checks this thread's status.
    fn build(&self, env: &TaskEnv<'_>, scene: SceneId, ctx: ErrorContext) -> bool {
        let device = env.device;
        let active = self.task.num_active.load(Ordering::SeqCst);
        match self.task.commit {
            CommitMode::Single | CommitMode::Join => device.commit(scene),
            CommitMode::Partial => {
                device.commit_partial(scene, self.thread_index, active);
                device.commit_partial(scene, self.thread_index, active);
            }
        }
        match check_op(device, "commit") {
            Ok(()) => true,
            Err(err) => {
                env.errors.record(&err.with_context(ctx));
                false
            }
        }
    }

    fn drive(&self, env: &TaskEnv<'_>) -> Result<()> {
        let task = self.task;
        let per_iteration = task.mode.scene_per_iteration();
        let mut generator = MutationGenerator::new(task.mode, env.mutation);
        let mut persistent = if per_iteration {
            None
        } else {
            task.open_scene(env, 0, task.context(0, None))
        };

        for iteration in 0..task.scene_count {
            let ctx = task.context(0, Some(iteration));
            let scene = if per_iteration {
                generator.forget();
                task.open_scene(env, iteration, ctx)
            } else {
                persistent
            };

            let mut abandoned = scene.is_none();
            if let Some(scene) = scene {
                let outcome = generator.run_iteration(env.device, scene, task.scene_index, iteration);
                for err in outcome.errors {
                    env.errors.record(&err.with_context(ctx));
                }
                abandoned |= outcome.aborted;
            }

            let mut rng = task.schedule_rng(iteration, 0);
            let active = 1 + rng.next_usize(task.thread_count);
            task.num_active.store(active, Ordering::SeqCst);
            task.abandoned.store(abandoned, Ordering::SeqCst);
            tracing::trace!(iteration, active, abandoned, "mutation done");

            self.rendezvous(iteration)?;
            let built = match scene {
                Some(scene) if !abandoned => self.build(env, scene, ctx),
                _ => false,
            };
            self.rendezvous(iteration)?;

            if let (true, Some(scene)) = (built, scene) {
                match env.oracle.fire(env.device, scene, &mut rng) {
                    Ok(_) => {
                        task.verified.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => env.errors.record(&err.with_context(ctx)),
                }
            }
            if abandoned {
                task.abandoned_iterations.fetch_add(1, Ordering::SeqCst);
            }
            if per_iteration {
                task.close_scene(env, ctx);
            }
        }

        if persistent.take().is_some() {
            task.close_scene(env, task.context(0, None));
        }
        Ok(())
    }

    fn assist(&self, env: &TaskEnv<'_>) -> Result<()> {
        let task = self.task;
        for iteration in 0..task.scene_count {
            self.rendezvous(iteration)?;
            let participates = self.thread_index < task.num_active.load(Ordering::SeqCst)
                && !task.abandoned.load(Ordering::SeqCst);
            let scene = *task.scene.lock();
            if let (true, Some(scene)) = (participates, scene) {
                let ctx = task.context(self.thread_index, Some(iteration));
                if self.build(env, scene, ctx) {
                    let mut rng = task.schedule_rng(iteration, self.thread_index);
                    if let Err(err) = env.oracle.fire(env.device, scene, &mut rng) {
                        env.errors.record(&err.with_context(ctx));
                    }
                }
            }
            self.rendezvous(iteration)?;
        }
        Ok(())
    }
}
