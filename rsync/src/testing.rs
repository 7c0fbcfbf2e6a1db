//! Scripted command runners for tests.
//!
//! The copy engine is exercised end to end without an rsync binary on the
//! host: a [`ScriptedRunner`] replays canned outputs for matching argument
//! vectors and records when each invocation ran, which is what barrier and
//! parallelism assertions are built on.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::runner::{CommandOutput, CommandRunner};

/// One canned process result.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Simulated run time before the invocation "exits".
    pub delay: Duration,
}

impl Response {
    pub fn ok() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: String::new(),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        stdout.clone_into(&mut self.stdout);
        self
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        stderr.clone_into(&mut self.stderr);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One recorded invocation with its execution window.
#[derive(Debug, Clone)]
pub struct Call {
    pub args: Vec<String>,
    pub started: Instant,
    pub finished: Instant,
}

impl Call {
    pub fn has_arg(&self, wanted: &str) -> bool {
        self.args.iter().any(|arg| arg == wanted)
    }
}

type Predicate = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

struct Rule {
    matches: Predicate,
    responses: Vec<Response>,
    served: usize,
}

#[derive(Default)]
struct Gauge {
    active: usize,
    peak: usize,
}

/// Replays canned responses for matching invocations.
///
/// Rules are checked in registration order; the first match wins. A rule
/// registered with a response sequence serves them one by one and then
/// repeats the last, which is how flaky-then-healthy transfers are
/// scripted. An invocation no rule matches panics with the offending
/// argument vector, so a test never silently "succeeds" past an
/// unexpected call.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    gauge: Mutex<Gauge>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule answering every matching invocation with `response`.
    pub fn on<P>(&self, matches: P, response: Response)
    where
        P: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.on_sequence(matches, vec![response]);
    }

    /// Register a rule serving `responses` in order, repeating the last.
    pub fn on_sequence<P>(&self, matches: P, responses: Vec<Response>)
    where
        P: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        assert!(!responses.is_empty(), "a rule needs at least one response");
        self.rules.lock().unwrap().push(Rule {
            matches: Box::new(matches),
            responses,
            served: 0,
        });
    }

    /// Every invocation recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded invocations whose argv contains `wanted`.
    pub fn calls_with_arg(&self, wanted: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.has_arg(wanted))
            .collect()
    }

    /// Highest number of invocations that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.lock().unwrap().peak
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let response = {
            let mut rules = self.rules.lock().unwrap();
            let rule = rules
                .iter_mut()
                .find(|rule| (rule.matches)(args))
                .unwrap_or_else(|| panic!("no scripted response for: {program} {args:?}"));
            let index = rule.served.min(rule.responses.len() - 1);
            rule.served += 1;
            rule.responses[index].clone()
        };
        let started = Instant::now();
        {
            let mut gauge = self.gauge.lock().unwrap();
            gauge.active += 1;
            gauge.peak = gauge.peak.max(gauge.active);
        }
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        self.gauge.lock().unwrap().active -= 1;
        let finished = Instant::now();
        self.calls.lock().unwrap().push(Call {
            args: args.to_vec(),
            started,
            finished,
        });
        Ok(CommandOutput {
            code: response.code,
            stdout: response.stdout,
            stderr: response.stderr,
        })
    }
}

/// Convenience predicate: argv contains `wanted` verbatim.
pub fn arg(wanted: &'static str) -> impl Fn(&[String]) -> bool {
    move |args: &[String]| args.iter().any(|a| a == wanted)
}

/// Convenience predicate: the last argv element (the destination or the
/// listed path) ends with `suffix`.
pub fn last_arg_ends_with(suffix: &'static str) -> impl Fn(&[String]) -> bool {
    move |args: &[String]| args.last().is_some_and(|a| a.ends_with(suffix))
}

// A runner aborted mid-`run` (worker cancellation) simply never records
// the call; the gauge decrement is skipped as well. Tests that cancel
// should not assert on the gauge afterwards.

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn sequences_serve_in_order_then_repeat() {
        let runner = ScriptedRunner::new();
        runner.on_sequence(
            |_: &[String]| true,
            vec![Response::exit(10), Response::ok()],
        );
        let args = vec!["x".to_string()];
        assert_eq!(runner.run("rsync", &args).await.unwrap().code, 10);
        assert_eq!(runner.run("rsync", &args).await.unwrap().code, 0);
        assert_eq!(runner.run("rsync", &args).await.unwrap().code, 0);
        assert_eq!(runner.calls().len(), 3);
    }

    #[test(tokio::test)]
    #[should_panic(expected = "no scripted response")]
    async fn unexpected_invocations_panic() {
        let runner = ScriptedRunner::new();
        let args = vec!["x".to_string()];
        let _ = runner.run("rsync", &args).await;
    }
}
