use crate::repo::{DatadirSolver, RepoError, Repository};
use crate::service::{Service, VarKind};
use crate::variables::{VarError, VarSolver, Variables};
use crate::writer::{StepWriter, WriteError};
use log::{info, warn};
use std::collections::HashMap;
use std::env;

mod list;
mod steps;

pub use list::InstallList;
pub use steps::Steps;

/// Name of the file persisting the install list, relative to the process's
/// working directory.
pub const INSTALLED_LIST_FILENAME: &str = "installed.txt";

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Var(#[from] VarError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Top-level driver: resolves a target service's dependency graph and runs
/// the step pipeline over it, deepest dependencies first.
pub struct Installer<R, W> {
    repo: R,
    writer: W,
    variables: Variables,
    list: InstallList,
}

impl<R: Repository + Clone + 'static, W: StepWriter> Installer<R, W> {
    /// Creates an installer with an empty install list, the process
    /// environment as the common variable fallback, and the `datadir` solver
    /// wired to the repository.
    pub fn new(repo: R, writer: W) -> Installer<R, W> {
        let mut variables = Variables::new();
        variables.set_common(env::vars().collect());
        variables.register_solver(VarKind::Datadir, Box::new(DatadirSolver::new(repo.clone())));
        Installer {
            repo,
            writer,
            variables,
            list: InstallList::new(),
        }
    }

    pub fn with_common_vars(mut self, common: HashMap<String, String>) -> Installer<R, W> {
        self.variables.set_common(common);
        self
    }

    pub fn with_var_solvers(
        mut self,
        solvers: impl IntoIterator<Item = (VarKind, Box<dyn VarSolver>)>,
    ) -> Installer<R, W> {
        for (kind, solver) in solvers {
            self.variables.register_solver(kind, solver);
        }
        self
    }

    pub fn with_list(mut self, list: InstallList) -> Installer<R, W> {
        self.list = list;
        self
    }

    pub fn with_step_writer<W2: StepWriter>(self, writer: W2) -> Installer<R, W2> {
        Installer {
            repo: self.repo,
            writer,
            variables: self.variables,
            list: self.list,
        }
    }

    pub fn step_writer(&self) -> &W {
        &self.writer
    }

    /// Installs `srv` and everything it depends on. Dependencies install
    /// deepest level first so that a dependency always completes before any
    /// of its dependants start; the run stops at the first error.
    pub fn install(&mut self, srv: &Service) -> Result<(), InstallError> {
        let graph = self.repo.resolve_deps(srv)?;
        for level in (0..graph.depth()).rev() {
            for dep in graph.level(level).services() {
                self.install_single(dep)?;
            }
        }
        self.install_single(srv)
    }

    fn install_single(&mut self, srv: &Service) -> Result<(), InstallError> {
        if self.list.contains(&srv.name) {
            info!(target: srv.name.as_str(), "Already installed");
            return Ok(());
        }
        self.cache_vars(srv)?;
        Steps::new(srv, &mut self.writer).run(&self.repo, &self.variables)?;
        if let Err(err) = self.list.insert(&srv.name) {
            warn!(
                target: srv.name.as_str(),
                "Failed to record the installation: {}", err
            );
        }
        Ok(())
    }

    fn cache_vars(&mut self, srv: &Service) -> Result<(), InstallError> {
        self.variables.insert_many(&srv.name, &srv.variables)?;
        for parent in &srv.depends {
            match self.variables.add_parent(&srv.name, parent) {
                // A dependency recorded as installed by a previous run never
                // entered the store; its variables are simply unavailable.
                Err(VarError::NoService) => continue,
                result => result?,
            }
        }
        Ok(())
    }
}
