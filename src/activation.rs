//! One-shot system activation run when a worker initializes.
//!
//! Steps are fire-and-forget: a failure is logged and the worker carries on.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// One system-level action needed before a device is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationStep {
    /// Run an external program and wait for it.
    Command {
        /// Executable looked up on `PATH`.
        program: String,
        /// Arguments passed verbatim, without a shell.
        args: Vec<String>,
    },
    /// Write a value into a sysfs attribute.
    SysfsWrite {
        /// Attribute file.
        path: PathBuf,
        /// Value written, without trailing newline.
        value: String,
    },
}

impl ActivationStep {
    /// External command step.
    pub fn command<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self::Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Sysfs write step.
    pub fn sysfs<P: Into<PathBuf>, V: Into<String>>(path: P, value: V) -> Self {
        Self::SysfsWrite {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Turn on the analog capture switch of one mixer channel.
    pub fn mixer_switch(control: &str) -> Self {
        Self::command("amixer", ["cset".to_owned(), format!("name={control}"), "1".to_owned()])
    }

    /// Run the step once. Returns whether it succeeded.
    pub fn run(&self) -> bool {
        let result = match self {
            Self::Command { program, args } => match Command::new(program)
                .args(args)
                .stdout(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(format!("exited with {status}")),
                Err(err) => Err(err.to_string()),
            },
            Self::SysfsWrite { path, value } => {
                fs::write(path, value).map_err(|err| err.to_string())
            }
        };

        match result {
            Ok(()) => {
                debug!(step = %self, "activation step done");
                true
            }
            Err(reason) => {
                warn!(step = %self, %reason, "activation step failed, continuing");
                false
            }
        }
    }
}

impl fmt::Display for ActivationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { program, args } => {
                write!(f, "{program}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Self::SysfsWrite { path, value } => write!(f, "echo {value} > {}", path.display()),
        }
    }
}

/// Run every step in order, returning how many succeeded.
pub fn run_all(steps: &[ActivationStep]) -> usize {
    steps.iter().filter(|step| step.run()).count()
}
