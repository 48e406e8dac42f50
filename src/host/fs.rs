//! Local file system with unix ownership and permission bits

use super::accounts::SystemAccounts;
use anyhow::{Context, Result};
use convergence::{EntryType, FileSystem, Metadata, Ownership};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt, lchown};
use std::path::Path;

#[derive(Debug, Default)]
pub struct LocalFileSystem {
    accounts: SystemAccounts,
}

impl LocalFileSystem {
    pub fn new(accounts: SystemAccounts) -> Self {
        Self { accounts }
    }
}

impl FileSystem for LocalFileSystem {
    fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Could not stat {}", path.display()));
            }
        };

        let file_type = meta.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::File
        } else {
            EntryType::Other
        };

        Ok(Some(Metadata {
            entry_type,
            owner: self.accounts.user_name(meta.uid())?,
            group: self.accounts.group_name(meta.gid())?,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.permissions().mode() & 0o7777,
        }))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Could not read {}", path.display()))
    }

    fn write(&self, path: &Path, content: &[u8], ownership: &Ownership) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        if let Some(mode) = ownership.mode {
            options.mode(mode.bits());
        }
        options
            .open(path)
            .and_then(|mut file| file.write_all(content))
            .with_context(|| format!("Could not write {}", path.display()))?;
        self.set_ownership(path, ownership)
    }

    fn create_dir(&self, path: &Path, recursive: bool, ownership: &Ownership) -> Result<()> {
        if recursive {
            fs::create_dir_all(path)
        } else {
            match fs::create_dir(path) {
                Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
                other => other,
            }
        }
        .with_context(|| format!("Could not create {}", path.display()))?;
        self.set_ownership(path, ownership)
    }

    fn set_ownership(&self, path: &Path, ownership: &Ownership) -> Result<()> {
        let uid = ownership
            .owner
            .as_deref()
            .map(|o| self.accounts.uid_of(o))
            .transpose()?;
        let gid = ownership
            .group
            .as_deref()
            .map(|g| self.accounts.gid_of(g))
            .transpose()?;

        if uid.is_some() || gid.is_some() {
            lchown(path, uid, gid)
                .with_context(|| format!("Could not change owner of {}", path.display()))?;
        }
        if let Some(mode) = ownership.mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode.bits()))
                .with_context(|| format!("Could not change mode of {}", path.display()))?;
        }
        Ok(())
    }

    fn remove(&self, path: &Path, recursive: bool) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("Could not stat {}", path.display()))?;
        let result = if !meta.is_dir() {
            fs::remove_file(path)
        } else if recursive {
            fs::remove_dir_all(path)
        } else {
            fs::remove_dir(path)
        };
        result.with_context(|| format!("Could not remove {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence::Mode;
    use tempfile::TempDir;

    fn mode(bits: u32) -> Ownership {
        Ownership {
            mode: Some(Mode::new(bits).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_stat_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::default();
        assert!(fs.stat(&dir.path().join("nope")).unwrap().is_none());
        assert!(!fs.exists(&dir.path().join("nope")).unwrap());
    }

    #[test]
    fn test_write_applies_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        let fs = LocalFileSystem::default();

        fs.write(&path, b"StrictHostKeyChecking no", &mode(0o600)).unwrap();

        let meta = fs.stat(&path).unwrap().unwrap();
        assert_eq!(meta.entry_type, EntryType::File);
        assert_eq!(meta.mode, 0o600);
        assert_eq!(fs.read(&path).unwrap(), b"StrictHostKeyChecking no");
    }

    #[test]
    fn test_write_creates_file_with_declared_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id_rsa");
        LocalFileSystem::default()
            .write(&path, b"secret", &mode(0o600))
            .unwrap();

        let bits = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(bits, 0o600);
    }

    #[test]
    fn test_numeric_owner_is_unchanged_after_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared");
        let own = fs::metadata(dir.path()).unwrap();
        let wanted = Ownership {
            owner: Some(own.uid().to_string()),
            group: Some(own.gid().to_string()),
            mode: Some(Mode::new(0o755).unwrap()),
        };
        let fs = LocalFileSystem::default();

        fs.create_dir(&path, false, &wanted).unwrap();

        let meta = fs.stat(&path).unwrap().unwrap();
        assert_eq!(meta.uid, own.uid());
        assert!(wanted.is_satisfied_by(&meta));
    }

    #[test]
    fn test_create_dir_recursive_and_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c");
        let fs = LocalFileSystem::default();

        assert!(fs.create_dir(&path, false, &mode(0o755)).is_err());
        fs.create_dir(&path, true, &mode(0o750)).unwrap();
        fs.create_dir(&path, false, &mode(0o700)).unwrap();

        let meta = fs.stat(&path).unwrap().unwrap();
        assert_eq!(meta.entry_type, EntryType::Directory);
        assert_eq!(meta.mode, 0o700);
    }

    #[test]
    fn test_remove_non_empty_needs_recursive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("work");
        let fs = LocalFileSystem::default();
        fs.create_dir(&root.join("sub"), true, &Ownership::default()).unwrap();

        assert!(fs.remove(&root, false).is_err());
        fs.remove(&root, true).unwrap();
        assert!(fs.stat(&root).unwrap().is_none());
    }
}
