// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scriptable [`Executor`] for tests.

use crate::{
    log_input, log_output, output_to_exec_error, Executor, ExecutionError,
    Input, OutputExt,
};

use async_trait::async_trait;
use slog::Logger;
use std::process::Output;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handler called when a fake command completes.
pub type WaitFn = dyn FnMut(&Input) -> Output + Send + Sync;
pub type BoxedWaitFn = Box<WaitFn>;

struct FakeExecutorInner {
    log: Logger,
    counter: AtomicU64,
    wait_handler: Mutex<BoxedWaitFn>,
}

/// An executor which can expect certain inputs, and respond with specific
/// outputs.
pub struct FakeExecutor {
    inner: Arc<FakeExecutorInner>,
}

impl FakeExecutor {
    pub fn new(log: Logger) -> Arc<FakeExecutor> {
        Arc::new(Self {
            inner: Arc::new(FakeExecutorInner {
                log,
                counter: AtomicU64::new(0),
                wait_handler: Mutex::new(Box::new(|_input: &Input| {
                    Output::success()
                })),
            }),
        })
    }

    /// Set the request handler to an arbitrary function.
    pub fn set_wait_handler(&self, f: BoxedWaitFn) {
        *self.inner.wait_handler.lock().unwrap() = f;
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> crate::BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    // NOTE: We aren't actually performing any async operations -- it's up
    // to the caller to control the (synchronous) handlers.
    async fn execute(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError> {
        let id = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.inner.log, id, command.as_std());

        let input = Input::from(command.as_std());
        let output = self.inner.wait_handler.lock().unwrap()(&input);
        log_output(&self.inner.log, id, &output);

        if !output.status.success() {
            return Err(output_to_exec_error(input.to_string(), &output));
        }
        Ok(output)
    }
}

type DynamicHandler = Box<dyn FnMut(&Input) -> Output + Send + Sync>;

enum HandledCommand {
    Static { input: Input, output: Output },
    Dynamic { handler: DynamicHandler },
}

/// A handler that may be used for setting inputs/outputs to the executor
/// when these commands are known ahead-of-time.
///
/// See: [Self::register] for integration with a [FakeExecutor].
pub struct StaticHandler {
    expected: Vec<HandledCommand>,
    index: usize,
}

impl Default for StaticHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticHandler {
    pub fn new() -> Self {
        Self { expected: Vec::new(), index: 0 }
    }

    /// Convenience function to register the handler with a [FakeExecutor].
    pub fn register(mut self, executor: &FakeExecutor) {
        executor.set_wait_handler(Box::new(move |input: &Input| {
            self.execute(input)
        }));
    }

    /// Expects a static "input" to exactly produce some "output".
    pub fn expect(&mut self, input: Input, output: Output) {
        self.expected.push(HandledCommand::Static { input, output });
    }

    /// A helper for [Self::expect] which quietly succeeds.
    pub fn expect_ok<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::success())
    }

    /// A helper for [Self::expect] which quietly fails.
    pub fn expect_fail<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::failure())
    }

    /// Expects a dynamic handler to be invoked to dynamically determine the
    /// output of this call.
    pub fn expect_dynamic(&mut self, handler: DynamicHandler) {
        self.expected.push(HandledCommand::Dynamic { handler });
    }

    fn execute(&mut self, input: &Input) -> Output {
        let expected = self
            .expected
            .get_mut(self.index)
            .unwrap_or_else(|| panic!("Unexpected command: {input}"));
        self.index += 1;

        match expected {
            HandledCommand::Static { input: expected, output } => {
                assert_eq!(input, expected, "Unexpected input command");
                output.clone()
            }
            HandledCommand::Dynamic { ref mut handler } => handler(input),
        }
    }
}

impl Drop for StaticHandler {
    fn drop(&mut self) {
        let expected = self.expected.len();
        let actual = self.index;
        if actual < expected {
            let next = &self.expected[actual];
            let tip = match next {
                HandledCommand::Static { input, .. } => input.to_string(),
                HandledCommand::Dynamic { .. } => {
                    "<dynamic handler>".to_string()
                }
            };
            let errmsg = format!(
                "Only saw {actual} calls, expected {expected}\nNext would have been: {tip}"
            );
            if !std::thread::panicking() {
                assert!(false, "{errmsg}");
            } else {
                eprintln!("{errmsg}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[tokio::test]
    async fn static_handler_scripts_outputs_in_order() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect(
            Input::shell("reef status -J"),
            Output::success().set_stdout("{}"),
        );
        handler.expect_fail("reef local stop");
        handler.register(&executor);
        let executor = executor.as_executor();

        let mut command = tokio::process::Command::new("reef");
        command.args(["status", "-J"]);
        let output = executor.execute(&mut command).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "{}");

        let mut command = tokio::process::Command::new("reef");
        command.args(["local", "stop"]);
        let err = executor.execute(&mut command).await.unwrap_err();
        assert!(matches!(err, ExecutionError::CommandFailure(_)));
    }

    #[tokio::test]
    #[should_panic(expected = "Unexpected command")]
    async fn static_handler_rejects_unexpected_commands() {
        let executor = FakeExecutor::new(test_log());
        StaticHandler::new().register(&executor);
        let executor = executor.as_executor();

        let mut command = tokio::process::Command::new("rm");
        command.args(["-rf", "/"]);
        let _ = executor.execute(&mut command).await;
    }

    #[tokio::test]
    async fn dynamic_handler_sees_the_observed_input() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect_dynamic(Box::new(|input: &Input| {
            assert_eq!(input.program, "mv");
            Output::success()
        }));
        handler.register(&executor);
        let executor = executor.as_executor();

        let mut command = tokio::process::Command::new("mv");
        command.args(["a", "b"]);
        executor.execute(&mut command).await.unwrap();
    }
}
