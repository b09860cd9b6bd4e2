use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Variable name identifying a service's data directory path.
pub const VAR_DATADIR: &str = "datadir";

/// String opening a variable name to be replaced with its real value.
pub const TAG_OPEN: &str = "{{";
/// String closing a variable name to be replaced with its real value.
pub const TAG_CLOSE: &str = "}}";
/// Separates a parent service's name from one of its variable names.
pub const PARENT_SEP: char = '.';

pub const DEFAULT_PKG_MANAGER: &[&str] = &["pkcon", "install", "-y"];

/// A named, declarative unit of configuration to install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Service {
    #[serde(skip)]
    pub name: String,
    pub depends: BTreeSet<String>,
    pub setup: Option<String>,
    #[serde(rename = "pkgmanager")]
    pub pkg_manager: Vec<String>,
    pub packages: Vec<String>,
    pub links: BTreeMap<String, FilePath>,
    pub copies: BTreeMap<String, FilePath>,
    pub variables: BTreeMap<String, VarValue>,
    pub finalize: Option<String>,
}

impl Service {
    /// Parses a service document.
    ///
    /// An empty document is a valid service consisting only of its name and
    /// the defaults. Unknown keys are rejected: a typo in a service document
    /// would otherwise silently break a reinstall.
    pub fn parse(
        name: &str,
        text: &str,
        default_pkg_manager: &[String],
    ) -> Result<Service, serde_yaml::Error> {
        let mut srv = serde_yaml::from_str::<Option<Service>>(text)?.unwrap_or_default();
        srv.name = name.to_owned();
        if srv.pkg_manager.is_empty() {
            srv.pkg_manager = default_pkg_manager.to_vec();
        }
        srv.variables.insert(
            VAR_DATADIR.to_owned(),
            VarValue {
                kind: VarKind::Datadir,
                value: srv.name.clone(),
            },
        );
        Ok(srv)
    }
}

/// A destination path with an optional permission mode.
/// Mode 0 means "inherit whatever the filesystem assigns".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FilePathDoc")]
pub struct FilePath {
    pub path: String,
    pub mode: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FilePathDoc {
    Bare(String),
    Full {
        path: String,
        #[serde(default)]
        mode: u16,
    },
}

impl From<FilePathDoc> for FilePath {
    fn from(doc: FilePathDoc) -> Self {
        match doc {
            FilePathDoc::Bare(path) => FilePath { path, mode: 0 },
            FilePathDoc::Full { path, mode } => FilePath { path, mode },
        }
    }
}

/// The kind of a variable value. An open tag: besides the predefined kinds,
/// any string names a dynamically registered solver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Cleartext,
    Datadir,
    #[serde(untagged)]
    Other(String),
}

impl From<&str> for VarKind {
    fn from(kind: &str) -> Self {
        match kind {
            "cleartext" => VarKind::Cleartext,
            "datadir" => VarKind::Datadir,
            other => VarKind::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for VarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarKind::Cleartext => f.write_str("cleartext"),
            VarKind::Datadir => f.write_str("datadir"),
            VarKind::Other(kind) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VarValueDoc")]
pub struct VarValue {
    pub kind: VarKind,
    pub value: String,
}

impl VarValue {
    pub fn cleartext(value: impl Into<String>) -> VarValue {
        VarValue {
            kind: VarKind::Cleartext,
            value: value.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VarValueDoc {
    Bare(String),
    Full {
        #[serde(default = "cleartext_kind")]
        kind: VarKind,
        value: String,
    },
}

fn cleartext_kind() -> VarKind {
    VarKind::Cleartext
}

impl From<VarValueDoc> for VarValue {
    fn from(doc: VarValueDoc) -> Self {
        match doc {
            VarValueDoc::Bare(value) => VarValue::cleartext(value),
            VarValueDoc::Full { kind, value } => VarValue { kind, value },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Service, serde_yaml::Error> {
        let default: Vec<String> = DEFAULT_PKG_MANAGER.iter().map(|s| s.to_string()).collect();
        Service::parse("srv", text, &default)
    }

    #[test]
    fn empty_document() {
        let srv = parse("").unwrap();
        assert_eq!(srv.name, "srv");
        assert_eq!(srv.pkg_manager, DEFAULT_PKG_MANAGER);
        assert!(srv.depends.is_empty());
        assert!(srv.packages.is_empty());
        assert!(srv.setup.is_none());
        assert!(srv.finalize.is_none());
    }

    #[test]
    fn datadir_is_synthesised() {
        let srv = parse("").unwrap();
        assert_eq!(
            srv.variables.get(VAR_DATADIR),
            Some(&VarValue {
                kind: VarKind::Datadir,
                value: "srv".to_owned()
            })
        );
    }

    #[test]
    fn pkg_manager_override() {
        let srv = parse("pkgmanager: [apt-get, install]").unwrap();
        assert_eq!(srv.pkg_manager, ["apt-get", "install"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(parse("depnds: [typo]").is_err());
    }

    #[test]
    fn depends_duplicates_coalesce() {
        let srv = parse("depends: [a, b, a]").unwrap();
        assert_eq!(srv.depends.len(), 2);
    }

    #[test]
    fn file_path_shorthand() {
        let srv = parse("links: { src: /some/path }").unwrap();
        assert_eq!(
            srv.links["src"],
            FilePath {
                path: "/some/path".to_owned(),
                mode: 0
            }
        );
    }

    #[test]
    fn file_path_full_form() {
        let srv = parse("copies: { src: { path: /x, mode: 0o755 } }").unwrap();
        assert_eq!(
            srv.copies["src"],
            FilePath {
                path: "/x".to_owned(),
                mode: 0o755
            }
        );
    }

    #[test]
    fn var_value_shorthand() {
        let srv = parse("variables: { greeting: hello }").unwrap();
        assert_eq!(srv.variables["greeting"], VarValue::cleartext("hello"));
    }

    #[test]
    fn var_value_full_form_defaults_to_cleartext() {
        let srv = parse("variables: { greeting: { value: hello } }").unwrap();
        assert_eq!(srv.variables["greeting"], VarValue::cleartext("hello"));
    }

    #[test]
    fn var_value_custom_kind() {
        let srv = parse("variables: { token: { kind: keepassxc, value: mail/bob } }").unwrap();
        assert_eq!(
            srv.variables["token"],
            VarValue {
                kind: VarKind::Other("keepassxc".to_owned()),
                value: "mail/bob".to_owned()
            }
        );
    }
}
