//! External toolchain invocation
//!
//! Kernels compile by piping the rendered source into `compiler_cmd` on
//! stdin, with the target object path substituted for the `{OBJ}` token
//! (or appended when the token is absent). A non-zero exit, or an exit
//! that produced no object file, fails the current batch.

use crate::error::{EngineError, Result};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Token replaced by the target object path in `compiler_cmd`
pub const OBJ_TOKEN: &str = "{OBJ}";

/// Default toolchain pipeline: C99 in on stdin, shared object out
pub const DEFAULT_CMD: &str = "cc -x c - -std=gnu99 -O2 -fPIC -shared -o {OBJ} -lm";

#[derive(Debug, Clone)]
pub struct Compiler {
    cmd: String,
}

impl Compiler {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Argv with the object path substituted
    fn argv(&self, object: &Path) -> Vec<String> {
        let object = object.to_string_lossy();
        let mut argv: Vec<String> = self
            .cmd
            .split_whitespace()
            .map(|part| {
                if part.contains(OBJ_TOKEN) {
                    part.replace(OBJ_TOKEN, &object)
                } else {
                    part.to_string()
                }
            })
            .collect();
        if !self.cmd.contains(OBJ_TOKEN) {
            argv.push(object.into_owned());
        }
        argv
    }

    /// Compile `source` into the shared object at `object`.
    pub fn compile(&self, symbol: &str, source: &str, object: &Path) -> Result<()> {
        let argv = self.argv(object);
        let (program, args) = argv.split_first().ok_or_else(|| EngineError::CompileFailed {
            symbol: symbol.to_string(),
            detail: "empty compiler command".to_string(),
        })?;

        debug!(%symbol, command = %argv.join(" "), "compiling kernel");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::CompileFailed {
                symbol: symbol.to_string(),
                detail: format!("failed to spawn {program}: {e}"),
            })?;

        child
            .stdin
            .as_mut()
            .expect("stdin was piped")
            .write_all(source.as_bytes())?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EngineError::CompileFailed {
                symbol: symbol.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if !object.exists() {
            return Err(EngineError::CompileFailed {
                symbol: symbol.to_string(),
                detail: format!("compiler produced no object at {}", object.display()),
            });
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(DEFAULT_CMD)
    }
}
