//! Ordered test registry with groups and regex selection.

use std::sync::Arc;

use regex::Regex;

use super::RunContext;
use crate::error::{Error, ErrorKind};
use crate::Result;

/// Body of a registered test.
pub type TestFn = Arc<dyn Fn(&RunContext<'_>) -> Result<()> + Send + Sync>;

/// Outcome a test is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Expected {
    /// The body must succeed with a clean error counter.
    Pass,
    /// The body must fail.
    Fail,
}

/// Position of a test relative to a reporting group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMarker {
    /// Not grouped.
    Plain,
    /// First test of a group.
    Begin,
    /// Inside a group.
    Member,
    /// Last test of a group.
    End,
}

/// A registered test.
#[derive(Clone)]
pub struct Test {
    name: String,
    expected: Expected,
    enabled: bool,
    group: Option<String>,
    marker: GroupMarker,
    body: TestFn,
}

impl std::fmt::Debug for Test {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("expected", &self.expected)
            .field("enabled", &self.enabled)
            .field("group", &self.group)
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl Test {
    /// Test name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected outcome.
    #[must_use]
    pub const fn expected(&self) -> Expected {
        self.expected
    }

    /// Whether the test will run.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Group the test reports under.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Group position.
    #[must_use]
    pub const fn marker(&self) -> GroupMarker {
        self.marker
    }

    /// Runs the body.
    pub fn call(&self, ctx: &RunContext<'_>) -> Result<()> {
        (self.body)(ctx)
    }
}

/// Tests in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    tests: Vec<Test>,
    open_group: Option<String>,
    run_filter_applied: bool,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test.
    ///
    /// # Panics
    ///
    /// Panics if a test with the same name already exists.
    pub fn add<F>(&mut self, name: impl Into<String>, expected: Expected, body: F)
    where
        F: Fn(&RunContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        assert!(
            self.find(&name).is_none(),
            "test {name} registered twice"
        );
        let marker = match &self.open_group {
            None => GroupMarker::Plain,
            Some(group) if self.tests.last().and_then(Test::group) == Some(group.as_str()) => {
                GroupMarker::Member
            }
            Some(_) => GroupMarker::Begin,
        };
        self.tests.push(Test {
            name,
            expected,
            enabled: true,
            group: self.open_group.clone(),
            marker,
            body: Arc::new(body),
        });
    }

    /// Starts a group; tests added until [`Registry::end_group`] report
    /// together.
    pub fn begin_group(&mut self, name: impl Into<String>) {
        self.open_group = Some(name.into());
    }

    /// Closes the open group.
    pub fn end_group(&mut self) {
        let Some(group) = self.open_group.take() else {
            return;
        };
        if let Some(last) = self.tests.last_mut() {
            if last.group.as_deref() == Some(group.as_str()) {
                last.marker = if last.marker == GroupMarker::Begin {
                    // A one-test group still prints its group line.
                    GroupMarker::Begin
                } else {
                    GroupMarker::End
                };
            }
        }
    }

    /// Looks up a test by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Every test in order.
    #[must_use]
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Enables tests whose name matches `pattern`. The first call disables
    /// everything before enabling matches.
    pub fn run_matching(&mut self, pattern: &str) -> Result<usize> {
        let re = compile(pattern)?;
        if !self.run_filter_applied {
            self.run_filter_applied = true;
            self.tests.iter_mut().for_each(|t| t.enabled = false);
        }
        let mut matched = 0;
        for test in self.tests.iter_mut().filter(|t| re.is_match(&t.name)) {
            test.enabled = true;
            matched += 1;
        }
        Ok(matched)
    }

    /// Disables tests whose name matches `pattern`.
    pub fn skip_matching(&mut self, pattern: &str) -> Result<usize> {
        let re = compile(pattern)?;
        let mut matched = 0;
        for test in self.tests.iter_mut().filter(|t| re.is_match(&t.name)) {
            test.enabled = false;
            matched += 1;
        }
        Ok(matched)
    }
}

/// Patterns must match the whole test name.
fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        Error::new(ErrorKind::Selection)
            .with_message(format!("invalid pattern {pattern:?}"))
            .with_source(e)
    })
}
