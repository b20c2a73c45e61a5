//! Filesystem helpers with explicit permission modes
//!
//! Generated trust material and service configs land under the data
//! directory with fixed modes: keys and secrets 0600, secret dirs 0700,
//! everything else 0644/0755.

use std::fs;
use std::io::Write;
use std::path::Path;

/// Mode for certificates and generated config files
pub const PUBLIC_FILE_MODE: u32 = 0o644;
/// Mode for private keys and password files
pub const SECRET_FILE_MODE: u32 = 0o600;
/// Mode for ordinary directories
pub const PUBLIC_DIR_MODE: u32 = 0o755;
/// Mode for directories holding secrets
pub const SECRET_DIR_MODE: u32 = 0o700;

/// Write `contents` to `path`, creating parent directories, and force `mode`.
///
/// The mode is applied on open and again after writing so an existing file
/// with looser permissions is tightened.
pub fn write_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()?;
    set_mode(path, mode)
}

/// Copy `src` to `dst` and force `mode` on the destination
pub fn copy_file(src: &Path, dst: &Path, mode: u32) -> std::io::Result<()> {
    let data = fs::read(src)?;
    write_file(dst, &data, mode)
}

/// Create `path` (and parents) and force `mode` on the leaf directory
pub fn ensure_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_file(&path, b"hello", PUBLIC_FILE_MODE).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn write_file_tightens_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        write_file(&path, b"old", 0o666).unwrap();
        write_file(&path, b"new", SECRET_FILE_MODE).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn copy_and_dir_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"data").unwrap();

        let secrets = dir.path().join("secrets");
        ensure_dir(&secrets, SECRET_DIR_MODE).unwrap();
        let dst = secrets.join("copy");
        copy_file(&src, &dst, SECRET_FILE_MODE).unwrap();

        let dir_mode = fs::metadata(&secrets).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
        assert_eq!(fs::read(&dst).unwrap(), b"data");
    }
}
