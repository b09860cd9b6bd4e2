use crate::variables::{SolverError, VarSolver};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Resolves secret variables against a KeepassXC database: the variable's
/// intermediate value is an entry key, the final value is that entry's
/// password attribute.
pub struct KeepassXc {
    db_path: PathBuf,
    password: String,
}

#[derive(Debug, thiserror::Error)]
#[error("keepassxc-cli failed: {0}")]
struct KeepassXcError(String);

impl KeepassXc {
    pub fn new(db_path: impl Into<PathBuf>, password: impl Into<String>) -> KeepassXc {
        KeepassXc {
            db_path: db_path.into(),
            password: password.into(),
        }
    }
}

impl VarSolver for KeepassXc {
    fn value(&self, key: &str) -> Result<String, SolverError> {
        let mut child = Command::new("keepassxc-cli")
            .args(["show", "-sa", "password"])
            .arg(&self.db_path)
            .arg(key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // The CLI reads the database password from its stdin before
            // printing the entry.
            stdin.write_all(self.password.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(Box::new(KeepassXcError(message)));
        }
        let mut value = String::from_utf8_lossy(&output.stdout).into_owned();
        if value.ends_with('\n') {
            value.pop();
        }
        Ok(value)
    }
}
