use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};

/// The set of services already installed in this root, optionally backed by
/// an append-only file so the set survives across runs.
#[derive(Debug, Default)]
pub struct InstallList {
    installed: HashSet<String>,
    cache: Option<File>,
}

impl InstallList {
    /// A list with no persistence.
    pub fn new() -> InstallList {
        InstallList::default()
    }

    /// Pre-populates the set from the file, one service name per line, and
    /// keeps the file for appends. Empty lines are ignored, which also
    /// tolerates the leading newline written before the first name.
    pub fn new_cached(file: File) -> io::Result<InstallList> {
        let mut installed = HashSet::new();
        let mut reader = BufReader::new(file);
        for line in reader.by_ref().lines() {
            let line = line?;
            if !line.is_empty() {
                installed.insert(line);
            }
        }
        Ok(InstallList {
            installed,
            cache: Some(reader.into_inner()),
        })
    }

    /// Records a service as installed. An I/O error on the backing file is
    /// reported but never prevents the in-memory set from updating, so the
    /// rest of the run can proceed.
    pub fn insert(&mut self, name: &str) -> io::Result<()> {
        let result = match &mut self.cache {
            Some(file) => write!(file, "\n{}", name),
            None => Ok(()),
        };
        self.installed.insert(name.to_owned());
        result
    }

    pub fn contains(&self, name: &str) -> bool {
        self.installed.contains(name)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::path::Path;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn empty_file_yields_an_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.txt");
        let list = InstallList::new_cached(open(&path)).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn existing_lines_populate_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.txt");
        fs::write(&path, "service1\nservice2\nservice3").unwrap();

        let list = InstallList::new_cached(open(&path)).unwrap();
        assert_eq!(list.len(), 3);
        for name in ["service1", "service2", "service3"] {
            assert!(list.contains(name));
        }
    }

    #[test]
    fn leading_newline_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.txt");
        fs::write(&path, "\nservice1\nservice2").unwrap();

        let list = InstallList::new_cached(open(&path)).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn insert_appends_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.txt");
        fs::write(&path, "service1\nservice2\nservice3").unwrap();

        let mut list = InstallList::new_cached(open(&path)).unwrap();
        list.insert("testy").unwrap();
        assert!(list.contains("testy"));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("\ntesty"));
    }

    #[test]
    fn insert_round_trips_through_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.txt");

        let mut list = InstallList::new_cached(open(&path)).unwrap();
        list.insert("x").unwrap();
        drop(list);

        let list = InstallList::new_cached(open(&path)).unwrap();
        assert!(list.contains("x"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn uncached_list_still_tracks_members() {
        let mut list = InstallList::new();
        list.insert("srv").unwrap();
        assert!(list.contains("srv"));
    }
}
