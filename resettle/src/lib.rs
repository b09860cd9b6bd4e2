use crate::installer::{InstallError, InstallList, Installer, INSTALLED_LIST_FILENAME};
use crate::privilege::PrivilegeError;
use crate::repo::{FsRepo, RepoError, Repository};
use crate::secrets::KeepassXc;
use crate::service::{Service, VarKind};
use crate::variables::VarSolver;
use crate::writer::{DryRun, Os, StepWriter};
use log::warn;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use structopt::StructOpt;

pub mod graph;
pub mod installer;
pub mod logging;
pub mod privilege;
pub mod repo;
pub mod secrets;
pub mod service;
pub mod template;
pub mod testing;
pub mod variables;
pub mod writer;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no services found")]
    NoServices,

    #[error("could not determine the working directory: {0}")]
    WorkingDir(io::Error),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "resettle",
    about = "Reinstall a personal system configuration from a declarative service repository."
)]
pub struct Args {
    /// Do not color output (the default when in a non-interactive shell).
    #[structopt(long)]
    pub no_color: bool,

    /// Do not print anything on the terminal except errors.
    #[structopt(short, long)]
    pub quiet: bool,

    #[structopt(subcommand)]
    pub command: Option<Command>,

    #[structopt(flatten)]
    pub install: InstallArgs,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    // Not meant to be called by users: the installer re-runs itself under an
    // elevation utility with this subcommand to perform filesystem writes
    // where administration rights are required.
    #[structopt(
        name = "privilege",
        setting = structopt::clap::AppSettings::Hidden
    )]
    Privilege,
}

#[derive(Debug, StructOpt)]
pub struct InstallArgs {
    /// Change the base directory.
    #[structopt(short = "C", long, parse(from_os_str))]
    pub directory: Option<PathBuf>,

    /// Test the installation without writing any file.
    #[structopt(short = "d", long)]
    pub dry_run: bool,

    /// KeepassXC database path.
    #[structopt(long, env = "KEEPASSXC_PATH", parse(from_os_str))]
    pub keepassxc_path: Option<PathBuf>,

    /// KeepassXC database password.
    #[structopt(long, env = "KEEPASSXC_PASSWORD", hide_env_values = true)]
    pub keepassxc_password: Option<String>,

    /// Override the package manager command for services.
    #[structopt(long = "pkgmanager")]
    pub pkg_manager: Vec<String>,

    /// Specify the system variant.
    #[structopt(long)]
    pub variant: Option<String>,

    /// Services to install. Pass none to install all services in the base
    /// directory.
    pub services: Vec<String>,
}

pub fn run(args: Args) -> Result<(), RunError> {
    match args.command {
        Some(Command::Privilege) => run_privileged(),
        None => run_install(args.install),
    }
}

/// Entry point of the hidden subcommand: decode one instruction from stdin
/// and execute it. The exit status reports the result to the parent.
fn run_privileged() -> Result<(), RunError> {
    let registry = writer::runner_registry();
    registry
        .receive(io::stdin().lock())
        .map_err(RunError::from)
}

fn run_install(args: InstallArgs) -> Result<(), RunError> {
    let directory = match args.directory {
        Some(directory) => directory,
        None => std::env::current_dir().map_err(RunError::WorkingDir)?,
    };
    let mut repo = FsRepo::new(directory);
    if let Some(variant) = args.variant {
        repo = repo.with_variant(variant);
    }
    if !args.pkg_manager.is_empty() {
        repo = repo.with_pkg_manager(args.pkg_manager);
    }

    let services = load_services(&repo, &args.services)?;
    if services.is_empty() {
        return Err(RunError::NoServices);
    }

    let list = open_install_list();
    let mut solvers: Vec<(VarKind, Box<dyn VarSolver>)> = Vec::new();
    if let Some(path) = args.keepassxc_path {
        let password = args.keepassxc_password.unwrap_or_default();
        solvers.push((
            VarKind::from("keepassxc"),
            Box::new(KeepassXc::new(path, password)),
        ));
    }

    if args.dry_run {
        let installer = Installer::new(repo, DryRun::new())
            .with_list(list)
            .with_var_solvers(solvers);
        install_all(installer, &services)
    } else {
        let installer = Installer::new(repo, Os::new())
            .with_list(list)
            .with_var_solvers(solvers);
        install_all(installer, &services)
    }
}

fn install_all<R: Repository + Clone + 'static, W: StepWriter>(
    mut installer: Installer<R, W>,
    services: &[Service],
) -> Result<(), RunError> {
    for srv in services {
        installer.install(srv)?;
    }
    Ok(())
}

fn load_services<R: Repository>(repo: &R, names: &[String]) -> Result<Vec<Service>, RepoError> {
    if names.is_empty() {
        return repo.all_services();
    }
    names.iter().map(|name| repo.service(name)).collect()
}

/// The install list is a best-effort cache: failing to open or read it only
/// disables persistence for this run.
fn open_install_list() -> InstallList {
    let file = open_options().open(INSTALLED_LIST_FILENAME);
    match file {
        Ok(file) => match InstallList::new_cached(file) {
            Ok(list) => list,
            Err(err) => {
                warn!("Failed reading the previous installation list: {}", err);
                InstallList::new()
            }
        },
        Err(err) => {
            warn!(
                "{}: failed opening the installation list. Continuing without populating it",
                err
            );
            InstallList::new()
        }
    }
}

#[cfg(unix)]
fn open_options() -> OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true).mode(0o644);
    options
}

#[cfg(windows)]
fn open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    options
}
