//! One capture/solve/render cycle per trigger, and the loop that drives
//! them.

use std::future::Future;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::capture::Capturer;
use crate::hotkey::TriggerSignal;
use crate::render::Renderer;
use crate::solve::Solver;

/// Why [`run`] returned.
#[derive(Debug, PartialEq, Eq)]
pub enum Stop<T> {
    Interrupted,
    /// The listener future finished, with its output.
    ListenerExited(T),
}

/// Run one cycle per trigger until `interrupt` or `listener` completes.
///
/// Both futures are polled while a cycle is running, so an interrupt or a
/// listener failure cancels the cycle instead of waiting for it.
pub async fn run<C, S, I, L>(
    monitor: usize,
    capturer: &C,
    solver: &mut S,
    renderer: &mut dyn Renderer,
    triggers: &mut mpsc::Receiver<TriggerSignal>,
    interrupt: I,
    listener: L,
) -> Stop<L::Output>
where
    C: Capturer,
    S: Solver,
    I: Future,
    L: Future,
{
    tokio::pin!(interrupt);
    tokio::pin!(listener);

    loop {
        tokio::select! {
            Some(_) = triggers.recv() => {
                tokio::select! {
                    _ = handle_trigger(monitor, capturer, &mut *solver, &mut *renderer) => {}
                    _ = &mut interrupt => {
                        renderer.set_status("interrupted");
                        return Stop::Interrupted;
                    }
                    out = &mut listener => return Stop::ListenerExited(out),
                }
            }
            _ = &mut interrupt => return Stop::Interrupted,
            out = &mut listener => return Stop::ListenerExited(out),
        }
    }
}

/// Capture `monitor`, send it to the solver and stream the answer to the
/// renderer.
///
/// Failures are reported through the renderer's status line and never
/// propagate: the next trigger starts a fresh cycle.
pub async fn handle_trigger<C, S>(
    monitor: usize,
    capturer: &C,
    solver: &mut S,
    renderer: &mut dyn Renderer,
) where
    C: Capturer,
    S: Solver,
{
    let started = Instant::now();
    renderer.set_status("capturing...");

    let image = match capturer.capture(monitor).await {
        Ok(image) => image,
        Err(e) => {
            warn!(monitor, "Capture failed: {:#}", e);
            renderer.set_status(&format!("capture error: {:#}", e));
            return;
        }
    };
    info!(monitor, bytes = image.len(), "Captured screen");

    renderer.set_status("solving...");
    renderer.stream_start();
    let result = solver
        .solve(&image, |delta| renderer.stream_delta(delta))
        .await;
    renderer.stream_done();

    match result {
        Ok(answer) => info!(
            model = solver.model_name(),
            chars = answer.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Solved"
        ),
        Err(e) => {
            warn!(model = solver.model_name(), "Solve failed: {:#}", e);
            renderer.set_status(&format!("solve error: {:#}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::hotkey::trigger_channel;

    struct FakeCapturer {
        fail: bool,
    }

    impl Capturer for FakeCapturer {
        async fn capture(&self, monitor: usize) -> anyhow::Result<Vec<u8>> {
            if self.fail {
                anyhow::bail!("no display {}", monitor);
            }
            Ok(vec![0xFF, 0xD8, monitor as u8])
        }
    }

    struct FakeSolver {
        answer: Option<&'static [&'static str]>,
        seen: Vec<Vec<u8>>,
    }

    impl Solver for FakeSolver {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn solve<F: FnMut(&str) + Send>(
            &mut self,
            image: &[u8],
            mut on_delta: F,
        ) -> anyhow::Result<String> {
            self.seen.push(image.to_vec());
            let parts = self.answer.ok_or_else(|| anyhow::anyhow!("rate limited"))?;
            for part in parts {
                on_delta(part);
            }
            Ok(parts.concat())
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Renderer for Recorder {
        fn set_status(&mut self, status: &str) {
            self.calls.push(format!("status:{status}"));
        }
        fn stream_start(&mut self) {
            self.calls.push("start".into());
        }
        fn stream_delta(&mut self, delta: &str) {
            self.calls.push(format!("delta:{delta}"));
        }
        fn stream_done(&mut self) {
            self.calls.push("done".into());
        }
    }

    #[tokio::test]
    async fn successful_cycle_streams_answer() {
        let capturer = FakeCapturer { fail: false };
        let mut solver = FakeSolver {
            answer: Some(&["# Naive", " O(n^2)"][..]),
            seen: Vec::new(),
        };
        let mut renderer = Recorder::default();

        handle_trigger(2, &capturer, &mut solver, &mut renderer).await;

        assert_eq!(
            renderer.calls,
            [
                "status:capturing...",
                "status:solving...",
                "start",
                "delta:# Naive",
                "delta: O(n^2)",
                "done",
            ]
        );
        assert_eq!(solver.seen, [vec![0xFF, 0xD8, 2]]);
    }

    #[tokio::test]
    async fn capture_error_skips_solver() {
        let capturer = FakeCapturer { fail: true };
        let mut solver = FakeSolver {
            answer: Some(&["unused"][..]),
            seen: Vec::new(),
        };
        let mut renderer = Recorder::default();

        handle_trigger(0, &capturer, &mut solver, &mut renderer).await;

        assert_eq!(
            renderer.calls,
            ["status:capturing...", "status:capture error: no display 0"]
        );
        assert!(solver.seen.is_empty());
    }

    #[tokio::test]
    async fn solve_error_becomes_status() {
        let capturer = FakeCapturer { fail: false };
        let mut solver = FakeSolver {
            answer: None,
            seen: Vec::new(),
        };
        let mut renderer = Recorder::default();

        handle_trigger(0, &capturer, &mut solver, &mut renderer).await;

        assert_eq!(
            renderer.calls.last().map(String::as_str),
            Some("status:solve error: rate limited")
        );
        assert!(renderer.calls.contains(&"done".to_string()));
    }

    /// Never answers.
    struct StalledSolver;

    impl Solver for StalledSolver {
        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn solve<F: FnMut(&str) + Send>(
            &mut self,
            _image: &[u8],
            _on_delta: F,
        ) -> anyhow::Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn interrupt_cancels_running_cycle() {
        let (sink, mut triggers) = trigger_channel();
        assert!(sink.offer());
        let mut renderer = Recorder::default();

        let stop = tokio::time::timeout(
            Duration::from_secs(5),
            run(
                0,
                &FakeCapturer { fail: false },
                &mut StalledSolver,
                &mut renderer,
                &mut triggers,
                tokio::time::sleep(Duration::from_millis(50)),
                std::future::pending::<()>(),
            ),
        )
        .await
        .expect("interrupt was not observed during the cycle");

        assert_eq!(stop, Stop::Interrupted);
        assert!(renderer.calls.contains(&"status:solving...".to_string()));
        assert_eq!(renderer.calls.last().map(String::as_str), Some("status:interrupted"));
    }

    #[tokio::test]
    async fn listener_exit_cancels_running_cycle() {
        let (sink, mut triggers) = trigger_channel();
        assert!(sink.offer());
        let mut renderer = Recorder::default();

        let listener = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            "device gone"
        };
        let stop = tokio::time::timeout(
            Duration::from_secs(5),
            run(
                0,
                &FakeCapturer { fail: false },
                &mut StalledSolver,
                &mut renderer,
                &mut triggers,
                std::future::pending::<()>(),
                listener,
            ),
        )
        .await
        .expect("listener exit was not observed during the cycle");

        assert_eq!(stop, Stop::ListenerExited("device gone"));
    }

    #[tokio::test]
    async fn triggers_run_cycles_until_interrupted() {
        let (sink, mut triggers) = trigger_channel();
        let mut solver = FakeSolver {
            answer: Some(&["ok"][..]),
            seen: Vec::new(),
        };
        let mut renderer = Recorder::default();

        let feeder = async {
            for _ in 0..3 {
                while !sink.offer() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            // Let the last trigger be consumed.
            tokio::time::sleep(Duration::from_millis(100)).await;
        };
        let stop = run(
            1,
            &FakeCapturer { fail: false },
            &mut solver,
            &mut renderer,
            &mut triggers,
            feeder,
            std::future::pending::<()>(),
        )
        .await;

        assert_eq!(stop, Stop::Interrupted);
        assert_eq!(solver.seen.len(), 3);
    }
}
