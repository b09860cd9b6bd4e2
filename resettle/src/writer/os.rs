use super::{FileCopy, StepWriter, WriteError};
use crate::privilege::{self, Registry, Runner};
use crate::service::FilePath;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::symlink_file as symlink;

/// Performs the real side effects on the local system.
///
/// Filesystem writes that hit a permission wall are retried exactly once
/// through the privilege bridge; a second refusal is fatal.
#[derive(Debug, Default)]
pub struct Os;

impl Os {
    pub fn new() -> Os {
        Os
    }
}

impl StepWriter for Os {
    fn setup(&mut self, script: &str) -> Result<(), WriteError> {
        run_script(script)
    }

    fn install_packages(&mut self, argv: &[String]) -> Result<(), WriteError> {
        run_process(argv)
    }

    fn symlink_file(&mut self, dst: &FilePath, src: &Path) -> Result<(), WriteError> {
        match write_symlink(dst, src) {
            Err(WriteError::PermissionDenied { .. }) => {
                privilege::run(&PrivilegedPathWriter {
                    dst: dst.clone(),
                    kind: PathWrite::Symlink {
                        src: src.to_path_buf(),
                    },
                })
                .map_err(WriteError::from)
            }
            result => result,
        }
    }

    fn copy_file(&mut self, dst: &FilePath, src: &FileCopy) -> Result<(), WriteError> {
        match write_copy(dst, src) {
            Err(WriteError::PermissionDenied { .. }) => {
                privilege::run(&PrivilegedPathWriter {
                    dst: dst.clone(),
                    kind: PathWrite::Copy {
                        file_copy: src.clone(),
                    },
                })
                .map_err(WriteError::from)
            }
            result => result,
        }
    }

    fn finalize(&mut self, script: &str) -> Result<(), WriteError> {
        run_script(script)
    }
}

/// The one mutation shipped to the privileged subcommand: create a path,
/// either as a symlink or as a templated/binary copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegedPathWriter {
    dst: FilePath,
    kind: PathWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PathWrite {
    Symlink { src: PathBuf },
    Copy { file_copy: FileCopy },
}

impl Runner for PrivilegedPathWriter {
    const TAG: &'static str = "path-writer";

    // No recovery here: the child cannot escalate any further.
    fn run_privileged(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        match &self.kind {
            PathWrite::Symlink { src } => write_symlink(&self.dst, src)?,
            PathWrite::Copy { file_copy } => write_copy(&self.dst, file_copy)?,
        }
        Ok(())
    }
}

/// The runner registry shared by the parent process and the privileged
/// subcommand.
pub fn runner_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register::<PrivilegedPathWriter>();
    registry
}

fn write_symlink(dst: &FilePath, src: &Path) -> Result<(), WriteError> {
    write_path(dst, |path| match symlink(src, path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => match fs::read_link(path) {
            // An existing link to the same target counts as done.
            Ok(target) if target == src => Ok(()),
            _ => Err(classify(path, err)),
        },
        Err(err) => Err(classify(path, err)),
    })
}

fn write_copy(dst: &FilePath, src: &FileCopy) -> Result<(), WriteError> {
    write_path(dst, |path| {
        let file = File::create(path).map_err(|err| classify(path, err))?;
        let mut out = BufWriter::new(file);
        src.write_to(&mut out)?;
        out.flush().map_err(|err| classify(path, err))?;
        Ok(())
    })
}

fn write_path(
    dst: &FilePath,
    write: impl FnOnce(&Path) -> Result<(), WriteError>,
) -> Result<(), WriteError> {
    let path = Path::new(&dst.path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            make_parents(parent).map_err(|err| classify(parent, err))?;
        }
    }
    write(path)?;
    if dst.mode != 0 {
        chmod(path, dst.mode).map_err(|err| classify(path, err))?;
    }
    Ok(())
}

fn classify(path: &Path, err: io::Error) -> WriteError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        WriteError::PermissionDenied {
            path: path.to_path_buf(),
            source: err,
        }
    } else {
        WriteError::Io(err)
    }
}

#[cfg(unix)]
fn make_parents(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(windows)]
fn make_parents(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn chmod(path: &Path, mode: u16) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = path.symlink_metadata()?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(u32::from(mode));
    fs::set_permissions(path, permissions)
}

#[cfg(windows)]
fn chmod(_path: &Path, _mode: u16) -> io::Result<()> {
    Ok(())
}

fn run_process(argv: &[String]) -> Result<(), WriteError> {
    let (cmd, args) = match argv.split_first() {
        Some(parts) => parts,
        None => return Ok(()),
    };
    let status = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .map_err(|source| WriteError::SpawnFailed {
            argv: argv.to_vec(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(WriteError::ProcessFailed {
            argv: argv.to_vec(),
            code: status.code(),
        })
    }
}

fn run_script(script: &str) -> Result<(), WriteError> {
    run_process(&shell_args(script))
}

#[cfg(unix)]
fn shell_args(script: &str) -> Vec<String> {
    // -e stops the script at the first error.
    ["sh", "-e", "-c", script].iter().map(|s| s.to_string()).collect()
}

#[cfg(windows)]
fn shell_args(script: &str) -> Vec<String> {
    ["powershell", "-NoLogo", "-Command", script]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::variables::Variables;

    #[test]
    fn symlink_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source");
        fs::write(&src, "content").unwrap();

        let dst = dir.path().join("deep/nested/link");
        let mut writer = Os::new();
        writer
            .symlink_file(
                &FilePath {
                    path: dst.to_string_lossy().into_owned(),
                    mode: 0,
                },
                &src,
            )
            .unwrap();
        assert_eq!(fs::read_link(&dst).unwrap(), src);
    }

    #[test]
    fn symlink_to_the_same_target_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source");
        fs::write(&src, "content").unwrap();

        let dst = dir.path().join("link");
        let file_path = FilePath {
            path: dst.to_string_lossy().into_owned(),
            mode: 0,
        };
        let mut writer = Os::new();
        writer.symlink_file(&file_path, &src).unwrap();
        writer.symlink_file(&file_path, &src).unwrap();
    }

    #[test]
    fn symlink_to_a_different_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src1 = dir.path().join("source1");
        let src2 = dir.path().join("source2");
        fs::write(&src1, "one").unwrap();
        fs::write(&src2, "two").unwrap();

        let dst = dir.path().join("link");
        let file_path = FilePath {
            path: dst.to_string_lossy().into_owned(),
            mode: 0,
        };
        let mut writer = Os::new();
        writer.symlink_file(&file_path, &src1).unwrap();
        assert!(writer.symlink_file(&file_path, &src2).is_err());
    }

    #[test]
    fn copy_renders_and_chmods() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("conf.tpl");
        fs::write(&src, "plain").unwrap();

        let dst = dir.path().join("out/conf");
        let mut writer = Os::new();
        writer
            .copy_file(
                &FilePath {
                    path: dst.to_string_lossy().into_owned(),
                    mode: 0o600,
                },
                &FileCopy::new(src, "srv", Variables::new()),
            )
            .unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "plain");
        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn failing_process_reports_its_exit_code() {
        let argv: Vec<String> = ["sh", "-c", "exit 3"].iter().map(|s| s.to_string()).collect();
        match run_process(&argv) {
            Err(WriteError::ProcessFailed { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn permission_errors_are_recoverable() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            classify(Path::new("/etc/foo"), err),
            WriteError::PermissionDenied { .. }
        ));
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            classify(Path::new("/etc/foo"), err),
            WriteError::Io(_)
        ));
    }

    #[test]
    fn privileged_writer_round_trips_through_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source");
        fs::write(&src, "content").unwrap();
        let dst = dir.path().join("made/by/the/child");

        let runner = PrivilegedPathWriter {
            dst: FilePath {
                path: dst.to_string_lossy().into_owned(),
                mode: 0,
            },
            kind: PathWrite::Symlink { src: src.clone() },
        };
        let mut encoded = Vec::new();
        privilege::send(&mut encoded, &runner).unwrap();
        runner_registry().receive(encoded.as_slice()).unwrap();

        assert_eq!(fs::read_link(&dst).unwrap(), src);
    }
}
