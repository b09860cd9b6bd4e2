use crate::privilege::PrivilegeError;
use crate::service::FilePath;
use crate::template::{RenderError, Template};
use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::{fmt, fs};

mod dryrun;
mod os;

pub use dryrun::DryRun;
pub use os::{runner_registry, Os, PrivilegedPathWriter};

/// The side-effect boundary of an installation: everything observable a step
/// does goes through one of these five methods.
pub trait StepWriter {
    /// Runs a shell snippet before any other step.
    fn setup(&mut self, script: &str) -> Result<(), WriteError>;

    /// Spawns the package manager; success is exit status 0.
    fn install_packages(&mut self, argv: &[String]) -> Result<(), WriteError>;

    /// Creates a symbolic link at `dst.path` pointing at `src`, applying
    /// `dst.mode` when it is not 0.
    fn symlink_file(&mut self, dst: &FilePath, src: &Path) -> Result<(), WriteError>;

    /// Creates the file at `dst.path` with the content produced by `src`,
    /// applying `dst.mode` when it is not 0.
    fn copy_file(&mut self, dst: &FilePath, src: &FileCopy) -> Result<(), WriteError>;

    /// Runs a shell snippet after all other steps.
    fn finalize(&mut self, script: &str) -> Result<(), WriteError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("unable to run {}: {source}", DisplayArgv(.argv))]
    SpawnFailed {
        argv: Vec<String>,
        source: io::Error,
    },

    #[error("{} exited unsuccessfully (code {})", DisplayArgv(.argv), DisplayCode(.code))]
    ProcessFailed {
        argv: Vec<String>,
        code: Option<i32>,
    },

    #[error("permission denied writing {}: {source}", .path.display())]
    PermissionDenied {
        path: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

struct DisplayArgv<'a>(&'a Vec<String>);

impl fmt::Display for DisplayArgv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.join(" "))
    }
}

struct DisplayCode<'a>(&'a Option<i32>);

impl fmt::Display for DisplayCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{}", code),
            None => f.write_str("none"),
        }
    }
}

/// A lazy producer of file content for a copy operation.
///
/// Reading happens when the bytes are needed: binary sources (anything
/// containing a NUL byte) are written verbatim, text sources go through the
/// template engine. Carries its own variable snapshot so a privileged child
/// can render on its side of the pipe.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileCopy {
    src: PathBuf,
    service: String,
    vars: Variables,
}

impl FileCopy {
    pub fn new(src: PathBuf, service: impl Into<String>, vars: Variables) -> FileCopy {
        FileCopy {
            src,
            service: service.into(),
            vars,
        }
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<(), WriteError> {
        let content = fs::read(&self.src).map_err(|source| match source.kind() {
            io::ErrorKind::PermissionDenied => WriteError::PermissionDenied {
                path: self.src.clone(),
                source,
            },
            _ => WriteError::Io(source),
        })?;
        if content.contains(&0) {
            dst.write_all(&content)?;
        } else {
            Template::new(&self.service, &self.vars).render(content.as_slice(), dst)?;
        }
        Ok(())
    }

    /// The content as shown to a human: rendered text, a `*binary*`
    /// placeholder, or nothing when the source cannot be produced at all.
    pub fn display_contents(&self) -> String {
        let mut buf = Vec::new();
        if self.write_to(&mut buf).is_err() {
            return String::new();
        }
        if buf.contains(&0) {
            "*binary*".to_owned()
        } else {
            String::from_utf8_lossy(&buf).into_owned()
        }
    }
}

impl Clone for FileCopy {
    fn clone(&self) -> Self {
        FileCopy {
            src: self.src.clone(),
            service: self.service.clone(),
            vars: self.vars.snapshot(),
        }
    }
}
