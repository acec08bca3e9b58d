use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "accordd.sock";
pub const STORE_FILE: &str = "accord.db";

pub fn accord_root(home: &Path) -> PathBuf {
    home.join(".accord")
}

pub fn run_dir(home: &Path) -> PathBuf {
    accord_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn store_path(home: &Path) -> PathBuf {
    accord_root(home).join(STORE_FILE)
}
