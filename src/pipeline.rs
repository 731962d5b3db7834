// src/pipeline.rs
//
// Compose a sequence of external commands into a single data pipeline
// (spec.md §4.F). Commands are invoked with explicit argument vectors; the
// shell-style `c1 | c2 | ... | cn` string is used only for diagnostics.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::process::{Command as Process, Stdio};

/// One external command in a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Command {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The shell-equivalent representation used in diagnostics and in
    /// `Error::Command`.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Two descriptors compose into the same pipeline only if their working
    /// directory, environment, and process context are equal.
    fn composable_with(&self, other: &Command) -> bool {
        self.cwd == other.cwd && self.env == other.env
    }
}

/// Diagnostic, shell-style rendering of a full pipeline: `c1 | c2 | ... | cn`.
pub fn display_pipeline(cmds: &[Command]) -> String {
    cmds.iter()
        .map(Command::display)
        .collect::<Vec<_>>()
        .join(" | ")
}

pub struct PipelineRunner;

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    pub fn new() -> Self {
        PipelineRunner
    }

    /// Run a single command with the given stdin, returning its stdout.
    pub fn run_single(&self, cmd: &Command, stdin: &[u8]) -> Result<Vec<u8>> {
        let outputs = self.run(std::slice::from_ref(cmd), stdin)?;
        Ok(outputs.into_iter().next().unwrap_or_default())
    }

    /// Run `cmds` as `c1 | c2 | ... | cn`, feeding `input` to `c1`. Returns
    /// each stage's stdout in order (`run_single` callers want only the
    /// last). Every adjacent pair must be composable (same cwd/env); a
    /// mismatch is a caller error, not a command failure.
    pub fn run(&self, cmds: &[Command], input: &[u8]) -> Result<Vec<Vec<u8>>> {
        if cmds.is_empty() {
            return Err(Error::caller("pipeline must have at least one command"));
        }
        for pair in cmds.windows(2) {
            if !pair[0].composable_with(&pair[1]) {
                return Err(Error::caller(format!(
                    "cannot compose `{}` with `{}`: mismatched cwd/env",
                    pair[0].display(),
                    pair[1].display()
                )));
            }
        }

        tracing::debug!(pipeline = %display_pipeline(cmds), "running pipeline");

        let mut current = input.to_vec();
        let mut outputs = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            current = self
                .run_stage(cmd, &current)
                .map_err(|e| Error::in_function("PipelineRunner::run", e))?;
            outputs.push(current.clone());
        }
        Ok(outputs)
    }

    fn run_stage(&self, cmd: &Command, stdin: &[u8]) -> Result<Vec<u8>> {
        let mut process = Process::new(&cmd.program);
        process
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cmd.cwd {
            process.current_dir(cwd);
        }
        for (k, v) in &cmd.env {
            process.env(k, v);
        }

        let mut child = process
            .spawn()
            .map_err(|e| Error::command(cmd.display(), format!("spawn failed: {e}")))?;

        let mut stdin_pipe = child.stdin.take().expect("stdin was piped");
        let stdin_owned = stdin.to_vec();
        let writer = std::thread::spawn(move || {
            let _ = stdin_pipe.write_all(&stdin_owned);
        });

        let mut stdout = Vec::new();
        child
            .stdout
            .take()
            .expect("stdout was piped")
            .read_to_end(&mut stdout)
            .map_err(|e| Error::io(e.to_string()))?;

        let mut stderr = Vec::new();
        child
            .stderr
            .take()
            .expect("stderr was piped")
            .read_to_end(&mut stderr)
            .map_err(|e| Error::io(e.to_string()))?;

        let _ = writer.join();
        let status = child
            .wait()
            .map_err(|e| Error::command(cmd.display(), format!("wait failed: {e}")))?;

        if !status.success() {
            // `pnmfile` closing its stdin early produces a benign stderr
            // message on the upstream decoder; spec.md §4.G says to ignore
            // it rather than treat it as a failure signal.
            if is_benign_epipe(&stderr) {
                return Ok(stdout);
            }
            let err = Error::command(cmd.display(), format!("{status}"));
            return Err(Error::with_stderr(&stderr, Error::with_input(stdin, err)));
        }

        Ok(stdout)
    }
}

fn is_benign_epipe(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr);
    text.contains("Output file write error --- out of disk space?")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn have(cmd: &str) -> bool {
        Process::new("sh")
            .arg("-c")
            .arg(format!("command -v {cmd} >/dev/null 2>&1"))
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn single_stage_echoes_stdin() {
        if !have("cat") {
            eprintln!("skipping: cat not on PATH");
            return;
        }
        let runner = PipelineRunner::new();
        let out = runner
            .run_single(&Command::new("cat"), b"hello")
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn two_stage_pipeline_composes() {
        if !have("cat") || !have("rev") {
            eprintln!("skipping: cat/rev not on PATH");
            return;
        }
        let runner = PipelineRunner::new();
        let out = runner
            .run(&[Command::new("cat"), Command::new("rev")], b"abc\n")
            .unwrap();
        assert_eq!(out.last().unwrap(), b"cba\n");
    }

    #[test]
    fn nonzero_exit_is_command_error() {
        if !have("false") {
            eprintln!("skipping: false not on PATH");
            return;
        }
        let runner = PipelineRunner::new();
        let err = runner.run_single(&Command::new("false"), b"").unwrap_err();
        assert!(matches!(
            err,
            Error::InFunction(_, _)
        ));
    }

    #[test]
    fn empty_pipeline_is_caller_error() {
        let runner = PipelineRunner::new();
        let err = runner.run(&[], b"").unwrap_err();
        assert!(matches!(err, Error::Caller(_)));
    }

    #[test]
    fn mismatched_cwd_rejected() {
        let runner = PipelineRunner::new();
        let a = Command::new("cat");
        let mut b = Command::new("cat");
        b.cwd = Some("/tmp".to_string());
        let err = runner.run(&[a, b], b"x").unwrap_err();
        assert!(matches!(err, Error::Caller(_)));
    }

    #[test]
    fn display_pipeline_renders_shell_style() {
        let cmds = vec![
            Command::new("pngtopnm"),
            Command::new("pnmcut").arg("-left").arg("0"),
            Command::new("cjpeg"),
        ];
        assert_eq!(display_pipeline(&cmds), "pngtopnm | pnmcut -left 0 | cjpeg");
    }
}
