use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::{env, fmt};

/// Name of the hidden CLI subcommand executing one instruction as root.
pub const CLI_COMMAND: &str = "privilege";

/// Privilege elevation helpers, tried in order. The first one present wins.
const ELEVATION_UTILS: &[&str] = &["sudo", "doas"];

/// A self-contained mutation that can be shipped to a privileged copy of
/// this binary and executed there.
///
/// Implementations must be registered in the [`Registry`] used by the
/// privileged subcommand; the tag ties the encoded payload back to its
/// decoder without any runtime reflection.
pub trait Runner: Serialize {
    const TAG: &'static str;

    fn run_privileged(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error("could not locate the current executable: {0}")]
    CurrentExe(io::Error),

    #[error("unable to run {0}: {1}")]
    Elevation(String, io::Error),

    #[error("no privilege elevation utility found")]
    NoElevationUtility,

    #[error("unable to encode or decode the privileged instruction: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown privileged instruction {0:?}")]
    UnknownRunner(String),

    #[error("privileged instruction failed: {0}")]
    RunnerFailed(#[source] Box<dyn Error + Send + Sync>),

    #[error("privileged process exited unsuccessfully (code {})", DisplayCode(.0))]
    ChildFailed(Option<i32>),

    #[error(transparent)]
    Io(#[from] io::Error),
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

#[derive(Serialize, Deserialize)]
struct Envelope {
    tag: String,
    payload: Value,
}

/// Encodes a runner as `tag | payload` onto a writer.
pub fn send<R: Runner, W: Write>(mut dst: W, runner: &R) -> Result<(), PrivilegeError> {
    let envelope = Envelope {
        tag: R::TAG.to_owned(),
        payload: serde_json::to_value(runner)?,
    };
    serde_json::to_writer(&mut dst, &envelope)?;
    Ok(())
}

/// Executes `runner` in a privileged copy of this binary.
///
/// The elevation helper re-runs the current executable with the hidden
/// subcommand; the encoded runner travels over an anonymous pipe on the
/// child's stdin, closed afterwards so the child sees EOF. Stdout and stderr
/// are inherited.
pub fn run<R: Runner>(runner: &R) -> Result<(), PrivilegeError> {
    let exe = env::current_exe().map_err(PrivilegeError::CurrentExe)?;
    for util in ELEVATION_UTILS {
        let mut child = match Command::new(util)
            .arg(&exe)
            .arg(CLI_COMMAND)
            .stdin(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(PrivilegeError::Elevation((*util).to_owned(), err)),
        };
        let sent = match child.stdin.take() {
            Some(stdin) => send(stdin, runner),
            None => Ok(()),
        };
        let status = child.wait()?;
        sent?;
        return if status.success() {
            Ok(())
        } else {
            Err(PrivilegeError::ChildFailed(status.code()))
        };
    }
    Err(PrivilegeError::NoElevationUtility)
}

type Execute = fn(Value) -> Result<(), PrivilegeError>;

/// String-keyed registry mapping a runner tag to its decode-and-execute
/// function. Both the parent and the privileged subcommand populate it with
/// the same registration calls before any message crosses the pipe.
#[derive(Default)]
pub struct Registry {
    runners: HashMap<&'static str, Execute>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register<R: Runner + DeserializeOwned>(&mut self) {
        self.runners.insert(R::TAG, |payload| {
            let runner: R = serde_json::from_value(payload)?;
            runner.run_privileged().map_err(PrivilegeError::RunnerFailed)
        });
    }

    /// Decodes a single runner from `src` and executes it.
    pub fn receive<S: Read>(&self, src: S) -> Result<(), PrivilegeError> {
        let envelope: Envelope = serde_json::from_reader(src)?;
        let execute = self
            .runners
            .get(envelope.tag.as_str())
            .ok_or_else(|| PrivilegeError::UnknownRunner(envelope.tag.clone()))?;
        execute(envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[derive(Serialize, Deserialize)]
    struct TouchFile {
        path: PathBuf,
    }

    impl Runner for TouchFile {
        const TAG: &'static str = "touch-file";

        fn run_privileged(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
            fs::write(&self.path, b"done")?;
            Ok(())
        }
    }

    #[test]
    fn send_receive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("touched");

        let mut encoded = Vec::new();
        send(&mut encoded, &TouchFile { path: target.clone() }).unwrap();

        let mut registry = Registry::new();
        registry.register::<TouchFile>();
        registry.receive(encoded.as_slice()).unwrap();

        assert_eq!(fs::read(target).unwrap(), b"done");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut encoded = Vec::new();
        send(
            &mut encoded,
            &TouchFile {
                path: PathBuf::from("/nonexistent"),
            },
        )
        .unwrap();

        let registry = Registry::new();
        assert!(matches!(
            registry.receive(encoded.as_slice()),
            Err(PrivilegeError::UnknownRunner(tag)) if tag == "touch-file"
        ));
    }

    #[test]
    fn runner_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoded = Vec::new();
        send(
            &mut encoded,
            &TouchFile {
                path: dir.path().join("missing").join("touched"),
            },
        )
        .unwrap();

        let mut registry = Registry::new();
        registry.register::<TouchFile>();
        assert!(matches!(
            registry.receive(encoded.as_slice()),
            Err(PrivilegeError::RunnerFailed(_))
        ));
    }
}
