//! Per-task summaries reach the debug log.

mod common;

use std::io::{self, Write};
use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use scene_stress::runner::scenarios::intensive_regression;
use scene_stress::{CommitMode, SceneMode};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn single_mode_logs_one_summary_per_task() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let config = small_config();
    let (result, errors) = tracing::subscriber::with_default(subscriber, || {
        run_scenario(&config, |ctx| {
            intensive_regression(ctx, SceneMode::Static, CommitMode::Single)
        })
    });
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(errors, 0);

    let text = String::from_utf8_lossy(&captured.0.lock()).into_owned();
    let summaries: Vec<&str> = text.lines().filter(|l| l.contains("task finished")).collect();
    assert_eq!(summaries.len(), config.scaled(config.base_regression_scenes), "{text}");
    let rendezvous = format!("rendezvous=[{}]", 2 * config.scenes_per_task);
    for line in summaries {
        assert!(line.contains(&format!("verified={}", config.scenes_per_task)), "{line}");
        assert!(line.contains("abandoned=0"), "{line}");
        assert!(line.contains("worker_failures=0"), "{line}");
        assert!(line.contains(&rendezvous), "{line}");
    }
}
