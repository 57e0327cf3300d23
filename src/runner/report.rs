//! Runs the enabled tests and reports verdicts.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;

use super::{DeviceFactory, ErrorCounter, Expected, Registry, RunContext, Test};
use crate::cli::{Marker, Output};
use crate::config::HarnessConfig;
use crate::coordinator::panic_message;

/// Verdict of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Test name.
    pub name: String,
    /// Reporting group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Expected outcome.
    pub expected: Expected,
    /// Body returned `Ok` with a clean counter.
    pub ok: bool,
    /// `ok` agreed with `expected`.
    pub passed: bool,
    /// Errors counted while the test ran.
    pub errors: usize,
    /// Wall time.
    pub duration_ms: u64,
    /// Failure text, if the body failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Verdicts of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// One entry per test that ran.
    pub results: Vec<TestResult>,
}

impl RunSummary {
    /// Tests that passed.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Tests that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }
}

/// Drives a [`Registry`] against a device factory.
pub struct Runner {
    registry: Registry,
    config: HarnessConfig,
    factory: Box<DeviceFactory>,
    use_groups: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tests", &self.registry.tests().len())
            .field("config", &self.config)
            .field("use_groups", &self.use_groups)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub fn new(registry: Registry, config: HarnessConfig, factory: Box<DeviceFactory>) -> Self {
        Self {
            registry,
            config,
            factory,
            use_groups: true,
        }
    }

    /// Reports grouped tests one by one when `false`.
    #[must_use]
    pub const fn with_groups(mut self, enabled: bool) -> Self {
        self.use_groups = enabled;
        self
    }

    /// The registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The registry, for selection.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Runs one test and returns its verdict.
    pub fn run_test(&self, test: &Test) -> TestResult {
        let errors = ErrorCounter::new();
        let ctx = RunContext::new(&self.config, &errors, self.factory.as_ref());
        let span = tracing::info_span!("test", name = test.name());
        let _entered = span.enter();

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| test.call(&ctx)));
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let counted = errors.get();
        let (ok, message) = match outcome {
            Ok(Ok(())) if counted == 0 => (true, None),
            Ok(Ok(())) => (false, Some(format!("{counted} errors counted"))),
            Ok(Err(err)) => (false, Some(err.to_string())),
            Err(payload) => (false, Some(format!("panicked: {}", panic_message(payload.as_ref())))),
        };
        let passed = (test.expected() == Expected::Pass) == ok;
        if passed {
            tracing::info!(ok, errors = counted, duration_ms, "test passed");
        } else {
            tracing::warn!(ok, errors = counted, duration_ms, message = ?message, "test failed");
        }
        TestResult {
            name: test.name().to_string(),
            group: test.group().map(str::to_string),
            expected: test.expected(),
            ok,
            passed,
            errors: counted,
            duration_ms,
            message,
        }
    }

    /// Runs every enabled test in order, writing progress to `out`.
    pub fn run(&self, out: &mut Output) -> io::Result<RunSummary> {
        let human = !out.format().is_json();
        let mut summary = RunSummary::default();
        let tests = self.registry.tests();
        let mut i = 0;

        while i < tests.len() {
            let group = tests[i].group().filter(|_| self.use_groups);
            let Some(group) = group else {
                if tests[i].enabled() {
                    if human {
                        out.label(tests[i].name())?;
                    }
                    let result = self.run_test(&tests[i]);
                    if human {
                        out.marker(Marker::from_passed(result.passed))?;
                    }
                    summary.results.push(result);
                }
                i += 1;
                continue;
            };

            let end = tests[i..]
                .iter()
                .position(|t| t.group() != Some(group))
                .map_or(tests.len(), |n| i + n);
            let members: Vec<&Test> = tests[i..end].iter().filter(|t| t.enabled()).collect();
            if !members.is_empty() {
                if human {
                    out.label(group)?;
                }
                let mut all_passed = true;
                for test in members {
                    let result = self.run_test(test);
                    all_passed &= result.passed;
                    if human {
                        out.tick(Marker::from_passed(result.passed))?;
                    }
                    summary.results.push(result);
                }
                if human {
                    out.marker(Marker::from_passed(all_passed))?;
                }
            }
            i = end;
        }

        if human {
            out.line(&format!(
                "{} passed, {} failed",
                summary.passed(),
                summary.failed()
            ))?;
        } else {
            out.json(&summary)?;
        }
        out.flush()?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::error::{Error, ErrorKind};
    use crate::runner::reference_factory;
    use crate::test_utils::init_test_logging;
    use crate::{test_complete, test_phase};
    use std::io::Write;
    use std::sync::Arc;

    use parking_lot::Mutex;

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

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.add("clean", Expected::Pass, |_| Ok(()));
        r.add("counted", Expected::Pass, |ctx| {
            ctx.errors().record(&Error::new(ErrorKind::UnknownFailure));
            Ok(())
        });
        r.begin_group("pair");
        r.add("pair_ok", Expected::Pass, |_| Ok(()));
        r.add("pair_refused", Expected::Fail, |_| {
            Err(Error::new(ErrorKind::InvalidOperation))
        });
        r.end_group();
        r.add("panics", Expected::Pass, |_| panic!("boom"));
        r
    }

    fn runner() -> Runner {
        Runner::new(registry(), HarnessConfig::default(), reference_factory())
    }

    #[test]
    fn verdicts_follow_expected_outcome() {
        init_test_logging();
        test_phase!("verdicts_follow_expected_outcome");
        let captured = Captured::default();
        let mut out = Output::with_writer(OutputFormat::Human, captured.clone());
        let summary = runner().run(&mut out).expect("run");

        let passed: Vec<_> = summary.results.iter().map(|r| (r.name.as_str(), r.passed)).collect();
        assert_eq!(
            passed,
            [
                ("clean", true),
                ("counted", false),
                ("pair_ok", true),
                ("pair_refused", true),
                ("panics", false)
            ]
        );
        assert_eq!(summary.failed(), 2);

        let text = captured.text();
        assert!(text.contains("clean ... [PASSED]"), "{text}");
        assert!(text.contains("pair ...++ [PASSED]"), "{text}");
        assert!(text.contains("panics ... [FAILED]"), "{text}");
        assert!(text.ends_with("3 passed, 2 failed\n"), "{text}");
        test_complete!("verdicts_follow_expected_outcome");
    }

    #[test]
    fn no_groups_reports_members_individually() {
        init_test_logging();
        let captured = Captured::default();
        let mut out = Output::with_writer(OutputFormat::Human, captured.clone());
        let mut runner = runner().with_groups(false);
        runner.registry_mut().run_matching("pair_.*").expect("pattern");
        let summary = runner.run(&mut out).expect("run");
        assert_eq!(summary.results.len(), 2);
        let text = captured.text();
        assert!(text.contains("pair_ok ... [PASSED]"), "{text}");
        assert!(text.contains("pair_refused ... [PASSED]"), "{text}");
    }

    #[test]
    fn json_summary_is_one_object() {
        init_test_logging();
        let captured = Captured::default();
        let mut out = Output::with_writer(OutputFormat::Json, captured.clone());
        let mut runner = runner();
        runner.registry_mut().skip_matching("panics").expect("pattern");
        runner.run(&mut out).expect("run");
        let value: serde_json::Value = serde_json::from_str(captured.text().trim()).expect("json");
        let results = value["results"].as_array().expect("results");
        assert_eq!(results.len(), 4);
        assert_eq!(results[3]["expected"], "FAIL");
        assert_eq!(results[3]["group"], "pair");
    }
}
