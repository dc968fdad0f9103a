use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write a shell script named `name` into `dir` which runs until killed, to stand in for a server or host.
///
/// Names are matched by the kernel's 15 byte process name, so keep them short and unique per test.
pub(crate) fn fake_executable(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nsleep 600\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
