use crate::graph::DepGraph;
use crate::service::{Service, DEFAULT_PKG_MANAGER};
use crate::variables::{SolverError, VarSolver};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::{env, fs, io};

const DATA_DIR: &str = "data";
const LINK_DIR: &str = "links";

const SERVICE_FILE_PREFIX: &str = "service";
const SERVICE_FILE_SUFFIX: &str = ".yaml";

/// Hard ceiling on dependency resolution depth. A repository whose graph is
/// genuinely this deep is indistinguishable from a cyclic one.
const MAX_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("service {0:?} not found")]
    NotFound(String),

    #[error("unable to read {}: {}", .0.display(), .1)]
    UnableToRead(PathBuf, io::Error),

    #[error("unable to parse service {0:?}: {1}")]
    Parse(String, serde_yaml::Error),

    #[error("dependency cycle: resolving {0:?} exceeds {1} levels")]
    DependencyCycle(String, usize),

    #[error("unable to determine the current directory: {0}")]
    CurrentDir(io::Error),
}

/// The source of service definitions and of the per-service directories
/// holding files to copy and to symlink.
pub trait Repository {
    fn service(&self, name: &str) -> Result<Service, RepoError>;

    fn all_services(&self) -> Result<Vec<Service>, RepoError>;

    /// Absolute path of the directory holding a service's copy sources.
    /// There is no guarantee that the path exists.
    fn data_dir(&self, name: &str) -> Result<PathBuf, RepoError>;

    /// Absolute path of the directory holding a service's symlink sources.
    /// There is no guarantee that the path exists.
    fn link_dir(&self, name: &str) -> Result<PathBuf, RepoError>;

    fn resolve_deps(&self, srv: &Service) -> Result<DepGraph, RepoError>;
}

/// A repository rooted at a directory with one sub-directory per service.
#[derive(Debug, Clone)]
pub struct FsRepo {
    root: PathBuf,
    variant: Option<String>,
    default_pkg_manager: Vec<String>,
}

impl FsRepo {
    pub fn new(root: impl Into<PathBuf>) -> FsRepo {
        FsRepo {
            root: root.into(),
            variant: None,
            default_pkg_manager: DEFAULT_PKG_MANAGER.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Selects `service_<variant>.yaml` documents over `service.yaml`.
    pub fn with_variant(mut self, variant: impl Into<String>) -> FsRepo {
        self.variant = Some(variant.into());
        self
    }

    /// Overrides the package manager command used by services that do not
    /// declare their own.
    pub fn with_pkg_manager(mut self, cmd: Vec<String>) -> FsRepo {
        self.default_pkg_manager = cmd;
        self
    }

    fn document_path(&self, name: &str) -> PathBuf {
        let file = match &self.variant {
            Some(variant) => format!("{}_{}{}", SERVICE_FILE_PREFIX, variant, SERVICE_FILE_SUFFIX),
            None => format!("{}{}", SERVICE_FILE_PREFIX, SERVICE_FILE_SUFFIX),
        };
        self.root.join(name).join(file)
    }

    fn absolute(&self, path: PathBuf) -> Result<PathBuf, RepoError> {
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(env::current_dir()
                .map_err(RepoError::CurrentDir)?
                .join(path))
        }
    }
}

impl Repository for FsRepo {
    fn service(&self, name: &str) -> Result<Service, RepoError> {
        let path = self.document_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::NotFound(name.to_owned()))
            }
            Err(err) => return Err(RepoError::UnableToRead(path, err)),
        };
        Service::parse(name, &text, &self.default_pkg_manager)
            .map_err(|err| RepoError::Parse(name.to_owned(), err))
    }

    fn all_services(&self) -> Result<Vec<Service>, RepoError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|err| RepoError::UnableToRead(self.root.clone(), err))?;
        let mut services = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| RepoError::UnableToRead(self.root.clone(), err))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            match self.service(name) {
                Ok(srv) => services.push(srv),
                // A stray directory without a service document is fine.
                Err(RepoError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    fn data_dir(&self, name: &str) -> Result<PathBuf, RepoError> {
        self.absolute(self.root.join(name).join(DATA_DIR))
    }

    fn link_dir(&self, name: &str) -> Result<PathBuf, RepoError> {
        self.absolute(self.root.join(name).join(LINK_DIR))
    }

    fn resolve_deps(&self, srv: &Service) -> Result<DepGraph, RepoError> {
        let mut graph = DepGraph::new();
        let mut deps = srv.depends.clone();
        let mut level = 0;
        while !deps.is_empty() {
            if level == MAX_DEPTH {
                return Err(RepoError::DependencyCycle(srv.name.clone(), MAX_DEPTH));
            }
            for name in &deps {
                graph.insert(level, Rc::new(self.service(name)?));
            }
            deps = graph
                .level(level)
                .services()
                .flat_map(|dep| dep.depends.iter().cloned())
                .collect::<BTreeSet<_>>();
            level += 1;
        }
        Ok(graph)
    }
}

/// Resolves `datadir`-kind variables: the intermediate value is a service
/// name, the final value is that service's data directory.
#[derive(Debug, Clone)]
pub struct DatadirSolver<R> {
    repo: R,
}

impl<R> DatadirSolver<R> {
    pub fn new(repo: R) -> DatadirSolver<R> {
        DatadirSolver { repo }
    }
}

impl<R: Repository> VarSolver for DatadirSolver<R> {
    fn value(&self, name: &str) -> Result<String, SolverError> {
        let dir = self.repo.data_dir(name)?;
        dir.into_os_string()
            .into_string()
            .map_err(|_| SolverError::from("data directory path is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        dir
    }

    #[test]
    fn service_from_empty_document() {
        let dir = fixture(&[("srv/service.yaml", "")]);
        let repo = FsRepo::new(dir.path());
        let srv = repo.service("srv").unwrap();
        assert_eq!(srv.name, "srv");
        assert_eq!(srv.pkg_manager, DEFAULT_PKG_MANAGER);
    }

    #[test]
    fn service_not_found() {
        let dir = fixture(&[]);
        let repo = FsRepo::new(dir.path());
        assert!(matches!(
            repo.service("ghost"),
            Err(RepoError::NotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn service_variant() {
        let dir = fixture(&[
            ("srv/service.yaml", "packages: [plain]"),
            ("srv/service_laptop.yaml", "packages: [laptop]"),
        ]);
        let repo = FsRepo::new(dir.path()).with_variant("laptop");
        let srv = repo.service("srv").unwrap();
        assert_eq!(srv.packages, ["laptop"]);
    }

    #[test]
    fn all_services_skips_garbage() {
        let dir = fixture(&[
            ("srv1/service.yaml", ""),
            ("srv2/service.yaml", ""),
            ("garbage.txt", "please ignore"),
        ]);
        fs::create_dir(dir.path().join("emptydir")).unwrap();
        let repo = FsRepo::new(dir.path());
        let services = repo.all_services().unwrap();
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["srv1", "srv2"]);
    }

    #[test]
    fn data_and_link_dirs_are_absolute() {
        let dir = fixture(&[]);
        let repo = FsRepo::new(dir.path());
        let data = repo.data_dir("srv").unwrap();
        let link = repo.link_dir("srv").unwrap();
        assert!(data.is_absolute());
        assert!(link.is_absolute());
        assert_eq!(data, dir.path().join("srv").join("data"));
        assert_eq!(link, dir.path().join("srv").join("links"));
    }

    #[test]
    fn resolve_deps_two_levels() {
        let dir = fixture(&[
            ("lvl1-1/service.yaml", "depends: [\"lvl2-1\"]"),
            ("lvl1-2/service.yaml", "depends: [\"lvl2-2\"]"),
            ("lvl2-1/service.yaml", ""),
            ("lvl2-2/service.yaml", ""),
            ("srv/service.yaml", "depends: [\"lvl1-1\", \"lvl1-2\"]"),
        ]);
        let repo = FsRepo::new(dir.path());
        let srv = repo.service("srv").unwrap();
        let graph = repo.resolve_deps(&srv).unwrap();
        assert_eq!(graph.depth(), 2);
        assert!(graph.level(0).contains("lvl1-1"));
        assert!(graph.level(0).contains("lvl1-2"));
        assert!(graph.level(1).contains("lvl2-1"));
        assert!(graph.level(1).contains("lvl2-2"));
    }

    #[test]
    fn resolve_deps_without_dependencies() {
        let dir = fixture(&[("srv/service.yaml", "")]);
        let repo = FsRepo::new(dir.path());
        let srv = repo.service("srv").unwrap();
        let graph = repo.resolve_deps(&srv).unwrap();
        assert_eq!(graph.depth(), 0);
    }

    #[test]
    fn resolve_deps_detects_cycles() {
        let dir = fixture(&[
            ("a/service.yaml", "depends: [b]"),
            ("b/service.yaml", "depends: [a]"),
        ]);
        let repo = FsRepo::new(dir.path());
        let srv = repo.service("a").unwrap();
        assert!(matches!(
            repo.resolve_deps(&srv),
            Err(RepoError::DependencyCycle(name, _)) if name == "a"
        ));
    }

    #[test]
    fn datadir_solver_resolves_through_the_repo() {
        let dir = fixture(&[("srv/service.yaml", "")]);
        let repo = FsRepo::new(dir.path());
        let solver = DatadirSolver::new(repo.clone());
        let value = solver.value("srv").unwrap();
        assert_eq!(PathBuf::from(value), repo.data_dir("srv").unwrap());
    }
}
