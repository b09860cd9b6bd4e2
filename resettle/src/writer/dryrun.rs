use super::{FileCopy, StepWriter, WriteError};
use crate::service::FilePath;
use itertools::Itertools;
use std::io::{self, Write};
use std::path::Path;

/// Reports what each step would do, to a configurable sink, without touching
/// the system. The only errors it can produce are the sink's own.
#[derive(Debug)]
pub struct DryRun<W = io::Stdout> {
    out: W,
}

impl DryRun<io::Stdout> {
    pub fn new() -> DryRun<io::Stdout> {
        DryRun { out: io::stdout() }
    }
}

impl Default for DryRun<io::Stdout> {
    fn default() -> Self {
        DryRun::new()
    }
}

impl<W: Write> DryRun<W> {
    pub fn with_output(out: W) -> DryRun<W> {
        DryRun { out }
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}

impl<W: Write> StepWriter for DryRun<W> {
    fn setup(&mut self, script: &str) -> Result<(), WriteError> {
        write!(self.out, "{}", script)?;
        Ok(())
    }

    fn install_packages(&mut self, argv: &[String]) -> Result<(), WriteError> {
        write!(self.out, "Will run {:?}", argv.iter().join(" "))?;
        Ok(())
    }

    fn symlink_file(&mut self, dst: &FilePath, src: &Path) -> Result<(), WriteError> {
        write!(self.out, "{}\t➜ {}", src.display(), dst.path)?;
        if dst.mode != 0 {
            write!(self.out, " with permission {:o}", dst.mode)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn copy_file(&mut self, dst: &FilePath, src: &FileCopy) -> Result<(), WriteError> {
        write!(self.out, "Will write {:?}", dst.path)?;
        if dst.mode != 0 {
            write!(self.out, " with permission {:o}", dst.mode)?;
        }
        writeln!(self.out, " with the following content:")?;
        writeln!(self.out, "{}", src.display_contents())?;
        Ok(())
    }

    fn finalize(&mut self, script: &str) -> Result<(), WriteError> {
        write!(self.out, "{}", script)?;
        Ok(())
    }
}
