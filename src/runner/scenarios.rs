//! Test bodies and the default registry.

use crate::coordinator::{CommitMode, RegressionTask, TaskReport, WorkerPool};
use crate::engine::reference::RefDeviceConfig;
use crate::engine::{
    check_op, Device, GeometryFlags, QueryKind, QueryMode, Ray, SceneFlags, SceneId,
    TraversalHint,
};
use crate::error::{Error, ErrorContext, ErrorKind};
use crate::fault::{FaultConfig, FaultInjector};
use crate::mutation::mesh::{add_sphere, add_triangle, SphereSpec};
use crate::mutation::{MutationGenerator, SceneMode};
use crate::oracle::{MemoryLeakOracle, OracleViolation, RayOracle};
use crate::util::DetRng;
use crate::Result;

use super::{ErrorCounter, Expected, Registry, RunContext};

/// Rays fired by the back-face test; even indices face the triangle.
pub const BACKFACE_RAYS: usize = 1000;

/// Corners of the triangle used by the culling test.
pub const BACKFACE_TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]];

/// Scene flags the empty-scene group walks.
#[must_use]
pub fn empty_scene_flags() -> [SceneFlags; 6] {
    [
        SceneFlags::STATIC,
        SceneFlags::STATIC | SceneFlags::ROBUST,
        SceneFlags::STATIC | SceneFlags::COMPACT,
        SceneFlags::DYNAMIC,
        SceneFlags::DYNAMIC | SceneFlags::ROBUST,
        SceneFlags::DYNAMIC | SceneFlags::COMPACT,
    ]
}

const PLAN_SALT: u64 = 0x6d65_6d5f_706c_616e;

/// Creates a scene and checks the status.
pub fn new_scene(device: &dyn Device, flags: SceneFlags) -> Result<SceneId> {
    let scene = device.new_scene(flags);
    check_op(device, "new_scene")?;
    scene.ok_or_else(|| {
        Error::new(ErrorKind::UnknownFailure).with_message("new_scene returned no handle")
    })
}

/// Runs `body` on a fresh scene and deletes the scene afterwards, whatever
/// the outcome.
pub fn with_scene<T>(
    device: &dyn Device,
    flags: SceneFlags,
    body: impl FnOnce(SceneId) -> Result<T>,
) -> Result<T> {
    let scene = new_scene(device, flags)?;
    let result = body(scene);
    device.delete_scene(scene);
    let deleted = check_op(device, "delete_scene");
    let value = result?;
    deleted?;
    Ok(value)
}

fn commit(device: &dyn Device, scene: SceneId) -> Result<()> {
    device.commit(scene);
    check_op(device, "commit")
}

fn log_report(report: &TaskReport) {
    tracing::debug!(
        scene_index = report.scene_index,
        verified = report.verified,
        abandoned = report.abandoned,
        worker_failures = report.worker_failures,
        rendezvous = ?report.rendezvous,
        "task finished"
    );
}

/// Regression over `base_regression_scenes x intensity` scene indices.
///
/// Single commit mode runs one single-threaded task per index. Threaded
/// modes carve the thread budget into tasks of random size and run those
/// tasks side by side, each with its own pool.
pub fn intensive_regression(ctx: &RunContext<'_>, mode: SceneMode, commit: CommitMode) -> Result<()> {
    let config = ctx.config();
    let device = ctx.device();
    let env = ctx.task_env(device.as_ref(), ctx.errors(), None);
    let total = config.scaled(config.base_regression_scenes);
    let mut split = DetRng::from_index(mode.seed(ctx.scene_index(0), 0) ^ PLAN_SALT);
    let mut offset = 0;

    while offset < total {
        if !commit.is_threaded() {
            let task = RegressionTask::new(ctx.scene_index(offset), config.scenes_per_task, 1, mode, commit);
            log_report(&task.run(&env));
            offset += 1;
            continue;
        }

        let mut remaining = config.thread_count();
        let mut tasks = Vec::new();
        while remaining > 0 {
            let n = split.next_usize(remaining).max(1);
            remaining -= n;
            tasks.push(RegressionTask::new(
                ctx.scene_index(offset),
                config.scenes_per_task,
                n,
                mode,
                commit,
            ));
            offset += 1;
        }
        tracing::debug!(
            tasks = tasks.len(),
            threads = config.thread_count(),
            mode = mode.name(),
            commit = commit.name(),
            "starting task batch"
        );
        let failures = WorkerPool::new("tasks").run(tasks.len(), |i| log_report(&tasks[i].run(&env)), &|| {});
        for failure in failures {
            ctx.errors().record(&failure.into_error());
        }
    }
    Ok(())
}

/// Calibrate-then-replay fault injection, one scene index at a time.
///
/// Each index runs once with both monitors installed but disarmed to learn
/// the natural invocation counts, then once armed at a random fraction of
/// those counts. Both runs must leave the memory accumulator at zero. The
/// armed run's failures are deliberate and go to a scratch counter.
pub fn memory_monitor(ctx: &RunContext<'_>, mode: SceneMode) -> Result<()> {
    let device = ctx.device();
    let injector = FaultInjector::new(FaultConfig::full());
    injector.attach_device(device.as_ref());
    let result = replay_with_faults(ctx, device.as_ref(), &injector, mode);
    injector.detach_device(device.as_ref());
    tracing::info!(stats = ?injector.stats(), "memory monitor scenario done");
    result
}

fn replay_with_faults(
    ctx: &RunContext<'_>,
    device: &dyn Device,
    injector: &FaultInjector,
    mode: SceneMode,
) -> Result<()> {
    let total = ctx.config().scaled(ctx.config().base_regression_scenes);
    for offset in 0..total {
        let scene_index = ctx.scene_index(offset);
        let leak_context = |e: OracleViolation| {
            Error::from(e).with_context(ErrorContext {
                scene_index: Some(scene_index),
                ..ErrorContext::default()
            })
        };

        injector.reset();
        let dry = RegressionTask::new(scene_index, 1, 1, mode, CommitMode::Single)
            .run(&ctx.task_env(device, ctx.errors(), Some(injector)));
        log_report(&dry);
        MemoryLeakOracle::check(injector.memory()).map_err(leak_context)?;

        let mut rng = DetRng::from_index(mode.seed(scene_index, 0) ^ PLAN_SALT);
        let plan = injector.plan(&mut rng);
        injector.arm(plan);
        let injected = ErrorCounter::new();
        let armed = RegressionTask::new(scene_index, 1, 1, mode, CommitMode::Single)
            .run(&ctx.task_env(device, &injected, Some(injector)));
        log_report(&armed);
        tracing::debug!(
            scene_index,
            memory_break = ?plan.memory_break,
            progress_break = ?plan.progress_break,
            injected = injected.get(),
            bytes_used = injector.memory().bytes_used(),
            "armed replay finished"
        );
        MemoryLeakOracle::check(injector.memory()).map_err(leak_context)?;
    }
    injector.reset();
    Ok(())
}

/// Commits `garbage_scenes x intensity` scenes of random-bit geometry.
/// Only clean completion is required.
pub fn garbage_geometry(ctx: &RunContext<'_>) -> Result<()> {
    let device = ctx.device();
    let device = device.as_ref();
    let mut generator = MutationGenerator::new(SceneMode::Garbage, ctx.config().mutation);
    let total = ctx.config().scaled(ctx.config().garbage_scenes);

    for offset in 0..total {
        let scene_index = ctx.scene_index(offset);
        let ctx_at = ErrorContext {
            scene_index: Some(scene_index),
            ..ErrorContext::default()
        };
        generator.forget();
        let outcome = with_scene(device, SceneMode::Garbage.scene_flags(scene_index), |scene| {
            let outcome = generator.run_iteration(device, scene, scene_index, 0);
            if outcome.is_clean() {
                commit(device, scene)?;
            }
            Ok(outcome)
        });
        match outcome {
            Ok(outcome) => {
                for err in outcome.errors {
                    ctx.errors().record(&err.with_context(ctx_at));
                }
            }
            Err(err) => ctx.errors().record(&err.with_context(ctx_at)),
        }
    }
    Ok(())
}

/// A scene without geometry commits and never reports a hit.
pub fn empty_scene(ctx: &RunContext<'_>, flags: SceneFlags) -> Result<()> {
    let device = ctx.device();
    let device = device.as_ref();
    with_scene(device, flags, |scene| {
        commit(device, scene)?;
        let mut rng = DetRng::from_index(u64::from(flags.bits()));
        let report = ctx.oracle().fire(device, scene, &mut rng)?;
        report.expect_no_hits()?;
        Ok(())
    })
}

/// With culling enabled, exactly the rays facing the triangle's front
/// side hit.
pub fn backface_culling(ctx: &RunContext<'_>, mode: QueryMode, kind: QueryKind) -> Result<()> {
    let device = ctx.device_with(RefDeviceConfig::default().backface_culling(true));
    let device = device.as_ref();
    with_scene(device, SceneFlags::STATIC, |scene| {
        add_triangle(device, scene, GeometryFlags::Static, BACKFACE_TRIANGLE)?;
        commit(device, scene)?;

        let front = Ray::new([0.25, 0.25, -1.0], [0.0, 0.0, 1.0]);
        let back = Ray::new([0.25, 0.25, 1.0], [0.0, 0.0, -1.0]);
        let mut rays: Vec<Ray> = (0..BACKFACE_RAYS)
            .map(|i| if i % 2 == 0 { front } else { back })
            .collect();
        let mut rng = DetRng::new(1);
        RayOracle::issue(device, scene, mode, kind, TraversalHint::Coherent, &mut rays, &mut rng)?;

        let observed = rays.iter().filter(|r| r.any_hit()).count();
        let misplaced = rays
            .iter()
            .enumerate()
            .any(|(i, r)| r.any_hit() != (i % 2 == 0));
        if misplaced {
            return Err(OracleViolation::HitCount {
                expected: BACKFACE_RAYS / 2,
                observed,
            }
            .into());
        }
        Ok(())
    })
}

/// Committing an unmodified scene again changes nothing observable.
pub fn commit_idempotent(ctx: &RunContext<'_>) -> Result<()> {
    let device = ctx.device();
    let device = device.as_ref();
    let injector = FaultInjector::new(FaultConfig::memory_only());
    injector.attach_device(device);
    let result = with_scene(device, SceneFlags::STATIC, |scene| {
        let spec = SphereSpec {
            center: [0.0; 3],
            radius: 1.0,
            num_phi: 12,
            max_primitives: usize::MAX,
            motion: 0.0,
        };
        add_sphere(device, scene, GeometryFlags::Static, spec)?;
        commit(device, scene)?;
        let bytes = injector.memory().bytes_used();
        let first = ctx.oracle().fire(device, scene, &mut DetRng::new(7))?;

        commit(device, scene)?;
        let second = ctx.oracle().fire(device, scene, &mut DetRng::new(7))?;
        let after = injector.memory().bytes_used();
        if first != second || bytes != after {
            return Err(Error::new(ErrorKind::UnexpectedHit).with_message(format!(
                "second commit changed the scene: hits {} -> {}, bytes {bytes} -> {after}",
                first.total_hits(),
                second.total_hits()
            )));
        }
        Ok(())
    });
    injector.detach_device(device);
    result
}

/// Committing while buffers are mapped is an invalid operation; once they
/// are returned the same scene commits cleanly.
pub fn unmapped_before_commit(ctx: &RunContext<'_>) -> Result<()> {
    use crate::engine::BufferKind;

    let device = ctx.device();
    let device = device.as_ref();
    with_scene(device, SceneFlags::STATIC, |scene| {
        let spec = SphereSpec {
            center: [0.0; 3],
            radius: 1.0,
            num_phi: 50,
            max_primitives: usize::MAX,
            motion: 0.0,
        };
        let geometry = add_sphere(device, scene, GeometryFlags::Static, spec)?;
        add_sphere(device, scene, GeometryFlags::Static, spec)?;

        let index = device.map_buffer(scene, geometry, BufferKind::Index);
        let vertex = device.map_buffer(scene, geometry, BufferKind::Vertex0);
        check_op(device, "map_buffer")?;

        device.commit(scene);
        let refused = device.take_error();

        for buffer in [index, vertex].into_iter().flatten() {
            device.unmap_buffer(scene, buffer);
        }
        check_op(device, "unmap_buffer")?;

        match refused {
            Some(crate::engine::EngineError::InvalidOperation) => commit(device, scene),
            Some(other) => Err(Error::from(other).with_message("commit with mapped buffers")),
            None => Err(Error::new(ErrorKind::InvalidOperation)
                .with_message("commit with mapped buffers was accepted")),
        }
    })
}

/// Adds a triangle with `geometry` flags to a scene with `scene` flags and
/// commits. Static scenes refuse mutable geometry.
pub fn scene_flags(ctx: &RunContext<'_>, scene: SceneFlags, geometry: GeometryFlags) -> Result<()> {
    let device = ctx.device();
    let device = device.as_ref();
    with_scene(device, scene, |id| {
        add_triangle(device, id, geometry, BACKFACE_TRIANGLE)?;
        commit(device, id)
    })
}

const fn geometry_flag_name(flags: GeometryFlags) -> &'static str {
    match flags {
        GeometryFlags::Static => "static",
        GeometryFlags::Deformable => "deformable",
        GeometryFlags::Dynamic => "dynamic",
    }
}

fn query_mode_name(mode: QueryMode, kind: QueryKind) -> String {
    let kind = match kind {
        QueryKind::Intersect => "intersect",
        QueryKind::Occluded => "occluded",
    };
    format!("{}_{kind}", mode.to_string().replace('-', "_"))
}

/// Every test in its reporting order.
#[must_use]
pub fn default_registry() -> Registry {
    let mut r = Registry::new();

    for scene in [SceneFlags::STATIC, SceneFlags::DYNAMIC] {
        for geometry in [GeometryFlags::Static, GeometryFlags::Deformable, GeometryFlags::Dynamic] {
            let expected = if scene.is_dynamic() || !geometry.is_mutable() {
                Expected::Pass
            } else {
                Expected::Fail
            };
            r.add(
                format!("flags_{scene}_{}", geometry_flag_name(geometry)),
                expected,
                move |ctx| scene_flags(ctx, scene, geometry),
            );
        }
    }
    r.add("unmapped_before_commit", Expected::Pass, unmapped_before_commit);
    r.add("commit_idempotent", Expected::Pass, commit_idempotent);

    r.begin_group("empty_scene");
    for flags in empty_scene_flags() {
        r.add(format!("empty_scene_{flags}"), Expected::Pass, move |ctx| {
            empty_scene(ctx, flags)
        });
    }
    r.end_group();

    r.begin_group("backface_culling");
    for mode in QueryMode::ALL {
        if mode == QueryMode::MaskedStream {
            continue;
        }
        for kind in [QueryKind::Intersect, QueryKind::Occluded] {
            r.add(
                format!("backface_culling_{}", query_mode_name(mode, kind)),
                Expected::Pass,
                move |ctx| backface_culling(ctx, mode, kind),
            );
        }
    }
    r.end_group();

    for commit in [CommitMode::Single, CommitMode::Partial, CommitMode::Join] {
        for mode in [SceneMode::Static, SceneMode::Dynamic] {
            let name = match commit {
                CommitMode::Single => format!("regression_{}", mode.name()),
                _ => format!("regression_{}_{}", mode.name(), commit.name()),
            };
            r.add(name, Expected::Pass, move |ctx| intensive_regression(ctx, mode, commit));
        }
    }
    for mode in [SceneMode::Static, SceneMode::Dynamic] {
        r.add(
            format!("regression_{}_memory_monitor", mode.name()),
            Expected::Pass,
            move |ctx| memory_monitor(ctx, mode),
        );
    }
    r.add("regression_garbage_geom", Expected::Pass, garbage_geometry);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::mutation::MutationConfig;
    use crate::oracle::RayOracleConfig;
    use crate::runner::reference_factory;
    use crate::test_utils::init_test_logging;
    use crate::{assert_with_log, test_complete, test_phase};

    fn small_config() -> HarnessConfig {
        HarnessConfig::default()
            .with_intensity(0.1)
            .with_threads(3)
            .with_mutation(MutationConfig::small())
            .with_oracle(RayOracleConfig {
                rays_per_batch: 8,
                extent: 1.0,
            })
    }

    fn run(config: &HarnessConfig, body: impl FnOnce(&RunContext<'_>) -> Result<()>) -> (Result<()>, usize) {
        let errors = ErrorCounter::new();
        let factory = reference_factory();
        let ctx = RunContext::new(config, &errors, factory.as_ref());
        let result = body(&ctx);
        (result, errors.get())
    }

    #[test]
    fn registry_names_follow_the_regression_suite() {
        let r = default_registry();
        for name in [
            "flags_static_deformable",
            "empty_scene_dynamic_robust",
            "backface_culling_packet8_occluded",
            "regression_static",
            "regression_dynamic_user_threads",
            "regression_static_build_join",
            "regression_dynamic_memory_monitor",
            "regression_garbage_geom",
        ] {
            assert!(r.find(name).is_some(), "missing {name}");
        }
        assert_eq!(r.find("flags_static_dynamic").map(crate::runner::Test::expected), Some(Expected::Fail));
        assert_eq!(r.find("flags_dynamic_dynamic").map(crate::runner::Test::expected), Some(Expected::Pass));
    }

    #[test]
    fn empty_scenes_commit_and_never_hit() {
        init_test_logging();
        test_phase!("empty_scenes_commit_and_never_hit");
        let config = small_config();
        for flags in empty_scene_flags() {
            let (result, errors) = run(&config, |ctx| empty_scene(ctx, flags));
            assert!(result.is_ok(), "{flags}: {result:?}");
            assert_eq!(errors, 0);
        }
        test_complete!("empty_scenes_commit_and_never_hit");
    }

    #[test]
    fn backface_culling_hits_front_half_in_every_mode() {
        init_test_logging();
        let config = small_config();
        for mode in QueryMode::ALL.into_iter().filter(|m| *m != QueryMode::MaskedStream) {
            for kind in [QueryKind::Intersect, QueryKind::Occluded] {
                let (result, _) = run(&config, |ctx| backface_culling(ctx, mode, kind));
                assert!(result.is_ok(), "{mode}/{kind:?}: {result:?}");
            }
        }
    }

    #[test]
    fn unmapped_buffers_block_commit() {
        init_test_logging();
        let (result, errors) = run(&small_config(), unmapped_before_commit);
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(errors, 0);
    }

    #[test]
    fn second_commit_is_a_no_op() {
        init_test_logging();
        let (result, _) = run(&small_config(), commit_idempotent);
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn static_scene_rejects_mutable_geometry() {
        init_test_logging();
        let config = small_config();
        let (ok, _) = run(&config, |ctx| scene_flags(ctx, SceneFlags::STATIC, GeometryFlags::Static));
        assert!(ok.is_ok());
        let (refused, _) = run(&config, |ctx| {
            scene_flags(ctx, SceneFlags::STATIC, GeometryFlags::Deformable)
        });
        let err = refused.expect_err("deformable geometry in a static scene");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn regressions_stay_clean() {
        init_test_logging();
        test_phase!("regressions_stay_clean");
        let config = small_config();
        for commit in [CommitMode::Single, CommitMode::Partial, CommitMode::Join] {
            for mode in [SceneMode::Static, SceneMode::Dynamic] {
                let (result, errors) = run(&config, |ctx| intensive_regression(ctx, mode, commit));
                assert!(result.is_ok());
                assert_with_log!(errors == 0, "error count", 0, errors);
            }
        }
        test_complete!("regressions_stay_clean");
    }

    #[test]
    fn memory_monitor_finds_no_leaks() {
        init_test_logging();
        let config = small_config();
        for mode in [SceneMode::Static, SceneMode::Dynamic] {
            let (result, errors) = run(&config, |ctx| memory_monitor(ctx, mode));
            assert!(result.is_ok(), "{mode:?}: {result:?}");
            assert_eq!(errors, 0);
        }
    }

    #[test]
    fn garbage_geometry_commits() {
        init_test_logging();
        let config = small_config().with_scene_counts(3, 20);
        let (result, errors) = run(&config, garbage_geometry);
        assert!(result.is_ok());
        assert_eq!(errors, 0);
    }
}
