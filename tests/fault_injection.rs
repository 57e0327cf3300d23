//! Fault injection against the reference engine.
//!
//! # Invariants
//! - Denying any single allocation leaves no bytes behind once the scene is gone
//! - A build aborted by a denied allocation releases exactly what it took
//! - An armed progress monitor cancels exactly one build, which can be retried
//! - The calibrate-then-replay scenario never reports a leak, for any seed

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use scene_stress::engine::{check, Device, EngineError, GeometryFlags, SceneFlags, SceneId};
use scene_stress::mutation::mesh::{add_sphere, SphereSpec};
use scene_stress::runner::scenarios::memory_monitor;
use scene_stress::{
    FaultConfig, FaultInjector, FaultPlan, MemoryLeakOracle, RefDevice, RefDeviceConfig, Result,
    SceneMode,
};

fn sphere(center: [f32; 3], num_phi: usize) -> SphereSpec {
    SphereSpec {
        center,
        radius: 1.0,
        num_phi,
        max_primitives: usize::MAX,
        motion: 0.0,
    }
}

/// Three deformable spheres. Stops at the first error.
fn populate(device: &dyn Device, scene: SceneId) -> Result<()> {
    for (i, num_phi) in [4, 6, 8].into_iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let x = 4.0 * i as f32;
        add_sphere(device, scene, GeometryFlags::Deformable, sphere([x, 0.0, 0.0], num_phi))?;
    }
    Ok(())
}

/// [`populate`], then a commit.
fn populate_and_commit(device: &dyn Device, scene: SceneId) -> Result<()> {
    populate(device, scene)?;
    device.commit(scene);
    check(device)
}

fn fresh_scene(device: &dyn Device, injector: &FaultInjector) -> SceneId {
    let scene = device.new_scene(SceneFlags::DYNAMIC).expect("scene");
    injector.attach_scene(device, scene);
    scene
}

#[test]
fn every_denied_allocation_is_released() {
    init_test_logging_with_level(tracing::Level::INFO);
    test_phase!("every_denied_allocation_is_released");
    let device = RefDevice::new(RefDeviceConfig::default());
    let injector = FaultInjector::new(FaultConfig::memory_only());
    injector.attach_device(&device);

    let scene = fresh_scene(&device, &injector);
    populate_and_commit(&device, scene).expect("dry run");
    let invocations = injector.memory().invocations();
    device.delete_scene(scene);
    assert!(invocations > 0);
    MemoryLeakOracle::check(injector.memory()).expect("dry run leaves nothing");

    let mut denied = 0;
    for index in 0..invocations {
        test_section!(format!("deny allocation {index}"));
        injector.arm(FaultPlan {
            memory_break: Some(index),
            progress_break: None,
        });
        let scene = fresh_scene(&device, &injector);
        let outcome = populate_and_commit(&device, scene);
        if let Err(err) = &outcome {
            assert_eq!(err.kind(), scene_stress::ErrorKind::OutOfMemory, "{err}");
            denied += 1;
        }
        device.delete_scene(scene);
        let bytes = injector.memory().bytes_used();
        assert_with_log!(bytes == 0, "bytes after delete", 0, bytes);
    }
    assert_eq!(denied, invocations);
    assert_eq!(injector.memory().denials(), invocations);
    assert_eq!(device.live_scenes(), 0);
    injector.detach_device(&device);
    test_complete!("every_denied_allocation_is_released", cases = invocations);
}

#[test]
fn denied_build_allocation_restores_the_byte_count() {
    init_test_logging_with_level(tracing::Level::INFO);
    test_phase!("denied_build_allocation_restores_the_byte_count");
    let device = RefDevice::new(RefDeviceConfig::default());
    let injector = FaultInjector::new(FaultConfig::memory_only());
    injector.attach_device(&device);

    let scene = fresh_scene(&device, &injector);
    populate(&device, scene).expect("populate");
    let before_commit = injector.memory().invocations();
    device.commit(scene);
    check(&device).expect("dry commit");
    let total = injector.memory().invocations();
    device.delete_scene(scene);
    assert!(total > before_commit, "commit allocates nothing");

    for index in before_commit..total {
        test_section!(format!("deny build allocation {index}"));
        injector.arm(FaultPlan {
            memory_break: Some(index),
            progress_break: None,
        });
        let scene = fresh_scene(&device, &injector);
        populate(&device, scene).expect("break point lies inside the commit");
        let before = injector.memory().bytes_used();
        device.commit(scene);
        let err = check(&device).expect_err("denied commit");
        assert_eq!(err.kind(), scene_stress::ErrorKind::OutOfMemory, "{err}");
        let after = injector.memory().bytes_used();
        assert_with_log!(after == before, "bytes across the aborted build", before, after);
        assert_eq!(device.live_scenes(), 1);
        device.delete_scene(scene);
    }
    assert_eq!(injector.memory().bytes_used(), 0);
    injector.detach_device(&device);
    let cases = total - before_commit;
    test_complete!("denied_build_allocation_restores_the_byte_count", cases = cases);
}

#[test]
fn armed_progress_cancels_exactly_once() {
    init_test_logging();
    test_phase!("armed_progress_cancels_exactly_once");
    let device = RefDevice::new(RefDeviceConfig::default());
    let injector = FaultInjector::new(FaultConfig::full());
    injector.attach_device(&device);

    let scene = fresh_scene(&device, &injector);
    populate_and_commit(&device, scene).expect("dry run");
    let calls = injector.progress().invocations();
    device.delete_scene(scene);
    assert!(calls > 0);

    for index in 0..calls {
        let before = injector.progress().trips();
        injector.arm(FaultPlan {
            memory_break: None,
            progress_break: Some(index),
        });
        let scene = fresh_scene(&device, &injector);
        let err = populate_and_commit(&device, scene).expect_err("armed build");
        assert!(err.is_cancelled(), "{err}");
        assert_eq!(injector.progress().trips(), before + 1);

        device.commit(scene);
        assert_eq!(device.take_error(), None, "retry after cancellation");
        assert_eq!(injector.progress().trips(), before + 1);
        device.delete_scene(scene);
        assert_eq!(injector.memory().bytes_used(), 0);
    }

    injector.arm(FaultPlan {
        memory_break: None,
        progress_break: Some(calls + 10),
    });
    let scene = fresh_scene(&device, &injector);
    populate_and_commit(&device, scene).expect("break point past the last callback");
    device.delete_scene(scene);
    assert_eq!(injector.progress().trips(), calls);
    injector.detach_device(&device);
    test_complete!("armed_progress_cancels_exactly_once");
}

#[test]
fn cancelled_commit_reports_cancelled_status() {
    init_test_logging();
    let device = RefDevice::new(RefDeviceConfig::default());
    let injector = FaultInjector::new(FaultConfig::progress_only());
    injector.arm(FaultPlan {
        memory_break: None,
        progress_break: Some(0),
    });
    let scene = fresh_scene(&device, &injector);
    add_sphere(&device, scene, GeometryFlags::Static, sphere([0.0; 3], 4)).expect("sphere");
    device.commit(scene);
    assert_eq!(device.take_error(), Some(EngineError::Cancelled));
    device.delete_scene(scene);
}

proptest! {
    #![proptest_config(test_proptest_config(6))]

    #[test]
    fn replay_never_leaks(seed in 0u64..1_000_000, dynamic in any::<bool>()) {
        init_test_logging_with_level(tracing::Level::INFO);
        let mode = if dynamic { SceneMode::Dynamic } else { SceneMode::Static };
        let config = small_config().with_seed_base(seed);
        let (result, errors) = run_scenario(&config, |ctx| memory_monitor(ctx, mode));
        prop_assert!(result.is_ok(), "{:?}", result);
        prop_assert_eq!(errors, 0);
    }
}
