// src/image/cfgfiles.rs

//! Colon-separated account databases (`etc/passwd`, `etc/group`)
//!
//! Entries are kept in file order; lines that are comments or do not parse
//! are carried through untouched on write.

use crate::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PASSWD_FIELDS: &[&str] = &[
    "username",
    "password",
    "uid",
    "gid",
    "gcos-field",
    "home-dir",
    "login-shell",
];

pub const GROUP_FIELDS: &[&str] = &["groupname", "password", "gid", "user-list"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry(Vec<String>),
    Other(String),
}

/// An editable colon-separated file keyed by its first column
#[derive(Debug, Clone)]
pub struct ColonFile {
    path: PathBuf,
    fields: &'static [&'static str],
    lines: Vec<Line>,
}

impl ColonFile {
    /// Load the file; a missing file reads as empty
    pub fn load(path: &Path, fields: &'static [&'static str]) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let lines = content
            .lines()
            .map(|line| {
                let cols: Vec<String> = line.split(':').map(str::to_string).collect();
                if line.starts_with('#') || cols.len() != fields.len() {
                    Line::Other(line.to_string())
                } else {
                    Line::Entry(cols)
                }
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            fields,
            lines,
        })
    }

    pub fn passwd(root: &Path) -> Result<Self> {
        Self::load(&root.join("etc/passwd"), PASSWD_FIELDS)
    }

    pub fn group(root: &Path) -> Result<Self> {
        Self::load(&root.join("etc/group"), GROUP_FIELDS)
    }

    fn column(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }

    fn entries(&self) -> impl Iterator<Item = &Vec<String>> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(cols) => Some(cols),
            Line::Other(_) => None,
        })
    }

    /// Look up an entry by its key column, as field name → value pairs
    pub fn get(&self, key: &str) -> Option<Vec<(&'static str, String)>> {
        self.entries()
            .find(|cols| cols[0] == key)
            .map(|cols| self.fields.iter().copied().zip(cols.iter().cloned()).collect())
    }

    /// Value of `field` for the entry named `key`
    pub fn get_field(&self, key: &str, field: &str) -> Option<String> {
        let col = self.column(field)?;
        self.entries().find(|cols| cols[0] == key).map(|cols| cols[col].clone())
    }

    /// Key of the first entry whose `field` equals `value`
    pub fn find_by(&self, field: &str, value: &str) -> Option<String> {
        let col = self.column(field)?;
        self.entries().find(|cols| cols[col] == value).map(|cols| cols[0].clone())
    }

    /// Keys of all entries, in file order
    pub fn keys(&self) -> Vec<String> {
        self.entries().map(|cols| cols[0].clone()).collect()
    }

    /// Lowest system id (below 100) not used in the numeric `field`
    pub fn next_free_id(&self, field: &str) -> Option<u32> {
        let col = self.column(field)?;
        let used: Vec<&str> = self.entries().map(|cols| cols[col].as_str()).collect();
        (0..100).find(|id| !used.contains(&id.to_string().as_str()))
    }

    /// Change one field of an existing entry; returns whether the entry exists
    pub fn set_field(&mut self, key: &str, field: &str, value: &str) -> bool {
        let Some(col) = self.column(field) else {
            return false;
        };
        for line in &mut self.lines {
            if let Line::Entry(cols) = line {
                if cols[0] == key {
                    cols[col] = value.to_string();
                    return true;
                }
            }
        }
        false
    }

    /// Insert or replace the entry for `values[0]`; unspecified fields are empty
    pub fn set(&mut self, values: &[(&str, &str)]) {
        let mut cols = vec![String::new(); self.fields.len()];
        for (field, value) in values {
            if let Some(col) = self.column(field) {
                cols[col] = value.to_string();
            }
        }
        let key = cols[0].clone();
        for line in &mut self.lines {
            if let Line::Entry(existing) = line {
                if existing[0] == key {
                    *existing = cols;
                    return;
                }
            }
        }
        self.lines.push(Line::Entry(cols));
    }

    /// Remove the entry named `key`; returns whether one existed
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Entry(cols) if cols[0] == key));
        before != self.lines.len()
    }

    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry(cols) => out.push_str(&cols.join(":")),
                Line::Other(text) => out.push_str(text),
            }
            out.push('\n');
        }
        fs::write(&self.path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let pw = ColonFile::passwd(dir.path()).unwrap();
        assert!(pw.get("root").is_none());
    }

    #[test]
    fn test_set_get_remove_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pw = ColonFile::passwd(dir.path()).unwrap();
        pw.set(&[("username", "webservd"), ("password", "x"), ("uid", "80"), ("gid", "80")]);
        pw.write().unwrap();

        let pw = ColonFile::passwd(dir.path()).unwrap();
        assert_eq!(pw.get_field("webservd", "uid").as_deref(), Some("80"));
        assert_eq!(pw.find_by("uid", "80").as_deref(), Some("webservd"));

        let mut pw = pw;
        assert!(pw.remove("webservd"));
        assert!(!pw.remove("webservd"));
    }

    #[test]
    fn test_comments_preserved() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/group"), "# groups\nstaff::10:\n").unwrap();

        let mut gr = ColonFile::group(dir.path()).unwrap();
        assert_eq!(gr.get_field("staff", "gid").as_deref(), Some("10"));
        gr.set(&[("groupname", "web"), ("gid", "80")]);
        gr.write().unwrap();

        let content = fs::read_to_string(dir.path().join("etc/group")).unwrap();
        assert_eq!(content, "# groups\nstaff::10:\nweb::80:\n");
    }

    #[test]
    fn test_next_free_id_and_set_field() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/group"), "root::0:\nother::1:\nbin::2:\n").unwrap();

        let mut gr = ColonFile::group(dir.path()).unwrap();
        assert_eq!(gr.next_free_id("gid"), Some(3));
        assert!(gr.set_field("bin", "user-list", "root,daemon"));
        assert!(!gr.set_field("nobody", "user-list", "x"));
        assert_eq!(gr.get_field("bin", "user-list").as_deref(), Some("root,daemon"));
        assert_eq!(gr.keys(), vec!["root", "other", "bin"]);
    }
}
