// ABOUTME: Scripted command runner that replays canned outputs and records calls
// ABOUTME: Shared with other packages' tests through the test-utils feature

use crate::exec::{CommandOutput, CommandRunner, CommandSpec, ExitStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Arc<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

enum Response {
    Fixed(CommandOutput),
    /// Replayed in order; the last one repeats
    Sequence(VecDeque<CommandOutput>),
    Dynamic(Handler),
}

struct Rule {
    pattern: Vec<String>,
    response: Response,
}

/// A `CommandRunner` that answers from rules instead of spawning processes.
///
/// A rule matches when its pattern appears as a contiguous run inside the
/// command's argv. The most recently added matching rule wins; commands with
/// no matching rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput::new(ExitStatus::Code(0), stdout, "")
    }

    pub fn fail(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput::new(ExitStatus::Code(code), "", stderr)
    }

    pub fn on(&self, pattern: &[&str], output: CommandOutput) {
        self.push(pattern, Response::Fixed(output));
    }

    pub fn on_sequence(&self, pattern: &[&str], outputs: Vec<CommandOutput>) {
        self.push(pattern, Response::Sequence(outputs.into()));
    }

    pub fn on_fn<F>(&self, pattern: &[&str], handler: F)
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        self.push(pattern, Response::Dynamic(Arc::new(handler)));
    }

    /// Make every call sleep before answering, to expose overlapping work
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls whose argv contains `pattern`
    pub fn calls_matching(&self, pattern: &[&str]) -> Vec<CommandSpec> {
        let pattern: Vec<String> = pattern.iter().map(|s| s.to_string()).collect();
        self.calls()
            .into_iter()
            .filter(|spec| contains_run(&spec.argv(), &pattern))
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn push(&self, pattern: &[&str], response: Response) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            response,
        });
    }

    fn respond(&self, spec: &CommandSpec) -> CommandOutput {
        let argv = spec.argv();
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules
            .iter_mut()
            .rev()
            .find(|rule| contains_run(&argv, &rule.pattern))
        else {
            return Self::ok("");
        };

        let handler = match &mut rule.response {
            Response::Fixed(output) => return output.clone(),
            Response::Sequence(queue) => {
                return if queue.len() > 1 {
                    queue.pop_front().unwrap_or_else(|| Self::ok(""))
                } else {
                    queue.front().cloned().unwrap_or_else(|| Self::ok(""))
                };
            }
            Response::Dynamic(handler) => handler.clone(),
        };
        // Handlers may inspect the runner, so release the rules first
        drop(rules);
        handler(spec)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(spec.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let output = self.respond(&spec);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }
}

fn contains_run(argv: &[&str], pattern: &[String]) -> bool {
    if pattern.is_empty() {
        return true;
    }
    argv.windows(pattern.len())
        .any(|window| window.iter().zip(pattern).all(|(a, b)| *a == b.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_rule_wins_and_sequences_repeat_last() {
        let runner = ScriptedRunner::new();
        runner.on(&["inspect"], ScriptedRunner::fail(1, "nope"));
        runner.on_sequence(
            &["inspect", "-f"],
            vec![ScriptedRunner::ok("false"), ScriptedRunner::ok("true")],
        );

        let spec = CommandSpec::new("docker").args(["inspect", "-f", "x", "c"]);
        assert_eq!(runner.run(spec.clone()).await.stdout, b"false");
        assert_eq!(runner.run(spec.clone()).await.stdout, b"true");
        assert_eq!(runner.run(spec).await.stdout, b"true");

        let other = CommandSpec::new("docker").args(["inspect", "c"]);
        assert_eq!(runner.run(other).await.exit, ExitStatus::Code(1));
        assert_eq!(runner.calls_matching(&["inspect", "-f"]).len(), 3);
    }
}
