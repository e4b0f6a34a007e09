use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::ErrorKind;

use crate::atomic::AtomicFile;

/// 受限目录：所有经由它解析的路径都不能逃出根目录。
///
/// 上传目录与可选的沙箱根目录（限制任意路径读取）共用这一实现。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub async fn resolve_path_checked(
        &self,
        relative: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// 打开根目录下已存在的普通文件。
    pub async fn open_file(&self, relative: &str) -> Result<(File, std::fs::Metadata), StorageError> {
        let target = self.resolve_path_checked(relative, false).await?;
        open_regular_file(&target).await
    }

    /// 把任意路径的 `source` 原子复制为根目录下的 `name`，返回复制的字节数。
    pub async fn copy_into(&self, source: &Path, name: &str) -> Result<u64, StorageError> {
        let target = self.resolve_path_checked(name, true).await?;
        let mut input = File::open(source).await?;
        let mut atomic = AtomicFile::new(&target).await?;
        let copied = match tokio::io::copy(&mut input, atomic.file_mut()).await {
            Ok(copied) => copied,
            Err(err) => {
                atomic.cleanup().await;
                return Err(StorageError::Io(err));
            }
        };
        atomic.finalize().await?;
        Ok(copied)
    }
}

/// 以只读方式打开 `path`，拒绝目录。
pub async fn open_regular_file(path: &Path) -> Result<(File, std::fs::Metadata), StorageError> {
    let metadata = fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(StorageError::NotAFile);
    }
    let file = File::open(path).await?;
    Ok((file, metadata))
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    NotAFile,
    Io(io::Error),
}

impl StorageError {
    /// 对调用方而言目标是否应视为不存在。
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::InvalidPath | StorageError::NotAFile => true,
            StorageError::Io(err) => err.kind() == ErrorKind::NotFound,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
