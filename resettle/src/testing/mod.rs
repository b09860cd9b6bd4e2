use crate::service::FilePath;
use crate::writer::{FileCopy, StepWriter, WriteError};
use std::path::{Path, PathBuf};

/// A step writer that performs nothing and records every call, so tests can
/// assert on the exact sequence of side effects a run would produce.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Setup(String),
    InstallPackages(Vec<String>),
    SymlinkFile { dst: FilePath, src: PathBuf },
    CopyFile { dst: FilePath, content: String },
    Finalize(String),
}

impl RecordingWriter {
    pub fn new() -> RecordingWriter {
        RecordingWriter::default()
    }
}

impl StepWriter for RecordingWriter {
    fn setup(&mut self, script: &str) -> Result<(), WriteError> {
        self.calls.push(Call::Setup(script.to_owned()));
        Ok(())
    }

    fn install_packages(&mut self, argv: &[String]) -> Result<(), WriteError> {
        self.calls.push(Call::InstallPackages(argv.to_vec()));
        Ok(())
    }

    fn symlink_file(&mut self, dst: &FilePath, src: &Path) -> Result<(), WriteError> {
        self.calls.push(Call::SymlinkFile {
            dst: dst.clone(),
            src: src.to_path_buf(),
        });
        Ok(())
    }

    fn copy_file(&mut self, dst: &FilePath, src: &FileCopy) -> Result<(), WriteError> {
        self.calls.push(Call::CopyFile {
            dst: dst.clone(),
            content: src.display_contents(),
        });
        Ok(())
    }

    fn finalize(&mut self, script: &str) -> Result<(), WriteError> {
        self.calls.push(Call::Finalize(script.to_owned()));
        Ok(())
    }
}
