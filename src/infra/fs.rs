//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides the file system helpers the environment needs:
//! resolving the module path, locating the optional configuration file and
//! the scoped working-directory guard.
//!
//! 此模块提供执行环境所需的文件系统辅助功能：
//! 解析模块路径、定位可选配置文件以及作用域工作目录守卫。

use anyhow::{Context, Result, bail};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the optional configuration file next to a module.
pub const CONFIG_SUFFIX: &str = ".config";

/// Gets the absolute path of an existing file.
///
/// # Arguments
/// * `path` - Path to canonicalize
///
/// # Returns
/// Canonicalized absolute path, or an error if the path doesn't exist or is
/// not a file
pub fn absolute_file_path(path: &Path) -> Result<PathBuf> {
    let absolute = fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
    if !absolute.is_file() {
        bail!("Not a file: {}", absolute.display());
    }
    Ok(absolute)
}

/// The directory containing `path`.
pub fn containing_directory(path: &Path) -> Result<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("Path has no parent directory: {}", path.display()))
}

/// `<module>.config` if that file exists, otherwise `None`.
pub fn optional_config_path(module_path: &Path) -> Option<PathBuf> {
    let mut config: OsString = module_path.as_os_str().to_owned();
    config.push(CONFIG_SUFFIX);
    let config = PathBuf::from(config);
    config.is_file().then_some(config)
}

/// Switches the process working directory for as long as the guard lives and
/// restores the previous one exactly once, on [`restore`](Self::restore) or drop.
///
/// The working directory is process-global: two guards must not overlap on
/// one process without external coordination.
///
/// 在守卫存活期间切换进程工作目录，并在 [`restore`](Self::restore) 或 drop 时
/// 恰好恢复一次之前的目录。
/// 工作目录是进程全局的：没有外部协调时，同一进程中的两个守卫不得重叠。
#[derive(Debug)]
pub struct WorkingDirectoryGuard {
    previous: PathBuf,
    restored: bool,
}

impl WorkingDirectoryGuard {
    pub fn enter(directory: &Path) -> io::Result<Self> {
        let previous = env::current_dir()?;
        env::set_current_dir(directory)?;
        tracing::debug!(from = %previous.display(), to = %directory.display(), "entered working directory");
        Ok(Self {
            previous,
            restored: false,
        })
    }

    /// The directory that will be restored.
    pub fn previous(&self) -> &Path {
        &self.previous
    }

    pub fn restore(mut self) -> io::Result<()> {
        self.restore_once()
    }

    fn restore_once(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        env::set_current_dir(&self.previous)?;
        tracing::debug!(to = %self.previous.display(), "restored working directory");
        Ok(())
    }
}

impl Drop for WorkingDirectoryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_once() {
            tracing::warn!(
                directory = %self.previous.display(),
                error = %e,
                "failed to restore working directory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_found_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("suite.toml");
        fs::write(&module, "name = \"suite\"").unwrap();
        assert_eq!(optional_config_path(&module), None);

        fs::write(dir.path().join("suite.toml.config"), "").unwrap();
        assert_eq!(
            optional_config_path(&module),
            Some(dir.path().join("suite.toml.config"))
        );
    }

    #[test]
    fn directories_are_not_module_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(absolute_file_path(dir.path()).is_err());
        assert!(absolute_file_path(&dir.path().join("missing.toml")).is_err());
    }
}
