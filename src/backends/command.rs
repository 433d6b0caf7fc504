use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use crate::backend::LocalModel;
use crate::error::BackendError;

/// A local model driven through an executable: the prompt goes to stdin and the completion is
/// read from stdout (for example `llama-cli -m model.gguf -f /dev/stdin`).
///
/// One instance means one model; the engine keeps it behind its serializing queue.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: PathBuf,
    args: Vec<String>,
    name: String,
}

impl CommandModel {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "command".to_owned());
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            name,
        }
    }

    fn resolve(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }
}

impl LocalModel for CommandModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&mut self, prompt: &str) -> Result<String, BackendError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackendError::permanent(format!("failed to start {}: {e}", self.program.display()))
            })?;

        // Feed stdin from its own thread so a chatty model cannot deadlock on a full stdout pipe.
        // A model that exits without reading its input is judged by its exit status below.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.to_owned();
            thread::spawn(move || match stdin.write_all(prompt.as_bytes()) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });

        let output = child
            .wait_with_output()
            .map_err(|e| BackendError::transport(format!("failed to read model output: {e}")))?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(BackendError::transport(format!("failed to write prompt: {e}")));
                }
                Err(_) => return Err(BackendError::permanent("prompt writer thread panicked")),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.chars().take(200).collect();
            return Err(BackendError::permanent(format!(
                "{} exited with {}: {snippet}",
                self.name, output.status
            )));
        }

        debug!(model = %self.name, bytes = output.stdout.len(), "local model finished");
        String::from_utf8(output.stdout)
            .map_err(|e| BackendError::permanent(format!("model output is not UTF-8: {e}")))
    }

    fn health_check(&mut self) -> Result<(), BackendError> {
        match self.resolve() {
            Some(_) => Ok(()),
            None => Err(BackendError::permanent(format!(
                "executable not found: {}",
                self.program.display()
            ))),
        }
    }
}
