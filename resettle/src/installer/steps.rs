use super::InstallError;
use crate::repo::Repository;
use crate::service::{FilePath, Service};
use crate::template::Template;
use crate::variables::Variables;
use crate::writer::{FileCopy, StepWriter};
use log::info;

/// Runs the five installation steps of one service, in order, against a step
/// writer. Any failure short-circuits the remaining steps.
pub struct Steps<'a, W> {
    srv: &'a Service,
    writer: &'a mut W,
}

impl<'a, W: StepWriter> Steps<'a, W> {
    pub fn new(srv: &'a Service, writer: &'a mut W) -> Steps<'a, W> {
        Steps { srv, writer }
    }

    pub fn run<R: Repository>(&mut self, repo: &R, vars: &Variables) -> Result<(), InstallError> {
        self.setup()?;
        self.install_packages()?;
        self.link_files(repo, vars)?;
        self.copy_files(repo, vars)?;
        self.finalize(vars)
    }

    fn setup(&mut self) -> Result<(), InstallError> {
        let script = match &self.srv.setup {
            Some(script) if !script.is_empty() => script,
            _ => return Ok(()),
        };
        info!(target: self.srv.name.as_str(), "Running setup script");
        self.writer.setup(script).map_err(InstallError::from)
    }

    fn install_packages(&mut self) -> Result<(), InstallError> {
        if self.srv.packages.is_empty() {
            return Ok(());
        }
        info!(target: self.srv.name.as_str(), "Installing OS packages");
        let argv: Vec<String> = self
            .srv
            .pkg_manager
            .iter()
            .chain(self.srv.packages.iter())
            .cloned()
            .collect();
        self.writer
            .install_packages(&argv)
            .map_err(InstallError::from)
    }

    fn link_files<R: Repository>(
        &mut self,
        repo: &R,
        vars: &Variables,
    ) -> Result<(), InstallError> {
        if self.srv.links.is_empty() {
            return Ok(());
        }
        info!(target: self.srv.name.as_str(), "Symlinking files");
        let link_dir = repo.link_dir(&self.srv.name)?;
        let tmpl = Template::new(&self.srv.name, vars);
        for (src_rel, dst) in &self.srv.links {
            let path = tmpl.render_string(&dst.path)?;
            self.writer.symlink_file(
                &FilePath {
                    path,
                    mode: dst.mode,
                },
                &link_dir.join(src_rel),
            )?;
        }
        Ok(())
    }

    fn copy_files<R: Repository>(
        &mut self,
        repo: &R,
        vars: &Variables,
    ) -> Result<(), InstallError> {
        if self.srv.copies.is_empty() {
            return Ok(());
        }
        info!(target: self.srv.name.as_str(), "Copying files");
        let data_dir = repo.data_dir(&self.srv.name)?;
        let tmpl = Template::new(&self.srv.name, vars);
        for (src_rel, dst) in &self.srv.copies {
            let path = tmpl.render_string(&dst.path)?;
            self.writer.copy_file(
                &FilePath {
                    path,
                    mode: dst.mode,
                },
                &FileCopy::new(data_dir.join(src_rel), &self.srv.name, vars.snapshot()),
            )?;
        }
        Ok(())
    }

    fn finalize(&mut self, vars: &Variables) -> Result<(), InstallError> {
        let script = match &self.srv.finalize {
            Some(script) if !script.is_empty() => script,
            _ => return Ok(()),
        };
        info!(target: self.srv.name.as_str(), "Running finalizer script");
        let script = Template::new(&self.srv.name, vars).render_string(script)?;
        self.writer.finalize(&script).map_err(InstallError::from)
    }
}
