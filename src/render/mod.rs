//! Answer output.

use std::io::{self, Write};

use tracing::info;

/// Sink for status lines and streamed answers.
pub trait Renderer: Send {
    fn set_status(&mut self, status: &str);
    fn stream_start(&mut self);
    fn stream_delta(&mut self, delta: &str);
    fn stream_done(&mut self);
}

const RULE_WIDTH: usize = 60;

/// Prints to a terminal (or any writer). Markdown is printed as-is.
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn rule(&mut self) {
        let _ = writeln!(self.out, "{}", "\u{2500}".repeat(RULE_WIDTH));
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn set_status(&mut self, status: &str) {
        let _ = writeln!(self.out, "{}", status);
        let _ = self.out.flush();
    }

    fn stream_start(&mut self) {
        self.rule();
    }

    fn stream_delta(&mut self, delta: &str) {
        // Ignore write errors: a closed terminal must not abort the cycle.
        let _ = self.out.write_all(delta.as_bytes());
        let _ = self.out.flush();
    }

    fn stream_done(&mut self) {
        let _ = writeln!(self.out);
        self.rule();
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}

/// Fans every call out to several renderers.
#[derive(Default)]
pub struct MultiRenderer {
    renderers: Vec<Box<dyn Renderer>>,
}

impl MultiRenderer {
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self { renderers }
    }
}

impl Renderer for MultiRenderer {
    fn set_status(&mut self, status: &str) {
        for r in &mut self.renderers {
            r.set_status(status);
        }
    }

    fn stream_start(&mut self) {
        for r in &mut self.renderers {
            r.stream_start();
        }
    }

    fn stream_delta(&mut self, delta: &str) {
        for r in &mut self.renderers {
            r.stream_delta(delta);
        }
    }

    fn stream_done(&mut self) {
        for r in &mut self.renderers {
            r.stream_done();
        }
    }
}

/// Records statuses and answer sizes in the log.
#[derive(Default)]
pub struct LogRenderer {
    streamed: usize,
}

impl Renderer for LogRenderer {
    fn set_status(&mut self, status: &str) {
        info!(status, "Status");
    }

    fn stream_start(&mut self) {
        self.streamed = 0;
    }

    fn stream_delta(&mut self, delta: &str) {
        self.streamed += delta.len();
    }

    fn stream_done(&mut self) {
        info!(bytes = self.streamed, "Answer complete");
    }
}

/// Build the renderers named in config: a comma-separated list of
/// "terminal" (default) and "log".
pub fn create_renderer(output: Option<&str>) -> anyhow::Result<Box<dyn Renderer>> {
    let mut renderers: Vec<Box<dyn Renderer>> = Vec::new();
    for name in output.unwrap_or("terminal").split(',').map(str::trim) {
        match name {
            "terminal" => renderers.push(Box::new(TerminalRenderer::stdout())),
            "log" => renderers.push(Box::new(LogRenderer::default())),
            other => anyhow::bail!("Unknown output mode: {}", other),
        }
    }
    if renderers.len() == 1 {
        if let Some(only) = renderers.pop() {
            return Ok(only);
        }
    }
    anyhow::ensure!(!renderers.is_empty(), "no output mode configured");
    Ok(Box::new(MultiRenderer::new(renderers)))
}
