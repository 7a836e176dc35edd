//! Utility functions used to extract data from procfs

use std::{
    fs::{self, File},
    io::{self, BufReader, prelude::*},
    path::PathBuf,
};

use lazy_static::lazy_static;
use nix::unistd::Pid;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    /// `start-end perms offset dev inode [pathname]`
    static ref RE_MAPS_LINE: Regex = Regex::new(
        r"^(?P<start>[0-9a-f]+)-(?P<end>[0-9a-f]+)\s+(?P<perms>[rwxps-]{4})\s+[0-9a-f]+\s+\S+\s+\d+\s*(?P<path>.*)$"
    )
    .unwrap();
}

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading link failed {path}")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
}

/// Returns the path an open file descriptor of a given process refers to.
pub fn get_process_fd_path(pid: Pid, fd: i32) -> Result<PathBuf, ProcfsError> {
    read_link(&format!("/proc/{pid}/fd/{fd}"))
}

/// Return where a link is pointing to.
fn read_link(path: &str) -> Result<PathBuf, ProcfsError> {
    fs::read_link(path).map_err(|source| ProcfsError::ReadFile {
        source,
        path: path.to_string(),
    })
}

/// A line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: usize,
    pub end: usize,
    pub writable: bool,
    pub shared: bool,
    /// Backing file, `None` for anonymous and pseudo (`[heap]`, ...) regions.
    pub path: Option<PathBuf>,
}

impl MemoryMapping {
    pub fn contains(&self, address: usize) -> bool {
        self.start <= address && address < self.end
    }
}

fn parse_maps_line(line: &str) -> Option<MemoryMapping> {
    let caps = RE_MAPS_LINE.captures(line)?;
    let start = usize::from_str_radix(caps.name("start")?.as_str(), 16).ok()?;
    let end = usize::from_str_radix(caps.name("end")?.as_str(), 16).ok()?;
    let perms = caps.name("perms")?.as_str().as_bytes();
    let path = caps
        .name("path")
        .map(|m| m.as_str().trim())
        .filter(|p| p.starts_with('/'))
        .map(|p| PathBuf::from(p.trim_end_matches(" (deleted)")));
    Some(MemoryMapping {
        start,
        end,
        writable: perms[1] == b'w',
        shared: perms[3] == b's',
        path,
    })
}

/// Returns the mapping of a given process containing `address`.
pub fn get_process_mapping(pid: Pid, address: usize) -> Result<Option<MemoryMapping>, ProcfsError> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(&path).map_err(|source| ProcfsError::ReadFile { source, path })?;

    let reader = BufReader::new(file);
    Ok(reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| parse_maps_line(&line))
        .find(|mapping| mapping.contains(address)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_maps_line() {
        let mapping = parse_maps_line(
            "7f2c4a1e0000-7f2c4a1e2000 rw-s 00000000 fd:01 1835045                    /var/lib/app/shared.db",
        )
        .unwrap();
        assert_eq!(mapping.start, 0x7f2c4a1e0000);
        assert_eq!(mapping.end, 0x7f2c4a1e2000);
        assert!(mapping.writable);
        assert!(mapping.shared);
        assert_eq!(mapping.path, Some(PathBuf::from("/var/lib/app/shared.db")));
        assert!(mapping.contains(0x7f2c4a1e1000));
        assert!(!mapping.contains(0x7f2c4a1e2000));

        let mapping = parse_maps_line("55d0c8e4f000-55d0c8e70000 rw-p 00000000 00:00 0                          [heap]").unwrap();
        assert!(!mapping.shared);
        assert_eq!(mapping.path, None);

        let mapping = parse_maps_line("7f2c4a000000-7f2c4a021000 r--p 00000000 00:00 0 ").unwrap();
        assert!(!mapping.writable);
        assert_eq!(mapping.path, None);

        let mapping = parse_maps_line(
            "7f2c4a1e0000-7f2c4a1e2000 r--p 00001000 fd:01 1835045 /tmp/gone (deleted)",
        )
        .unwrap();
        assert_eq!(mapping.path, Some(PathBuf::from("/tmp/gone")));

        assert_eq!(parse_maps_line("not a mapping"), None);
    }

    #[test]
    fn test_own_fd_path() {
        let path = std::env::temp_dir().join(format!("procfs-{}", uuid::Uuid::new_v4()));
        let file = File::create(&path).unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&file);
        assert_eq!(get_process_fd_path(Pid::this(), fd).unwrap(), path);
        drop(file);
        fs::remove_file(&path).unwrap();
    }
}
