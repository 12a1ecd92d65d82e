#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start with root privileges, whether inherited (real uid) or
/// gained through a setuid bit (effective uid). The server spawns an external
/// downloader on arbitrary URLs and writes into the media root.
pub fn ensure_not_root(process: &str) -> Result<()> {
    check_ids(Uid::current(), Uid::effective(), process)
}

fn check_ids(real: Uid, effective: Uid, process: &str) -> Result<()> {
    let privileged = match (real.is_root(), effective.is_root()) {
        (false, false) => return Ok(()),
        (true, _) => "root",
        (false, true) => "an effective uid of root",
    };
    bail!("{process} refuses to run as {privileged}; start it from an unprivileged account")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_ids_are_accepted() {
        let user = Uid::from_raw(1000);
        assert!(check_ids(user, user, "clipvault").is_ok());
    }

    #[test]
    fn real_root_is_rejected() {
        let root = Uid::from_raw(0);
        let err = check_ids(root, root, "clipvault").unwrap_err();
        assert!(err.to_string().contains("refuses to run as root;"));
    }

    #[test]
    fn setuid_root_is_rejected() {
        let err = check_ids(Uid::from_raw(1000), Uid::from_raw(0), "clipvault").unwrap_err();
        assert!(err.to_string().contains("effective uid of root"));
    }
}
