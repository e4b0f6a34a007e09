//! 任意路径图片读取（/viewer），可选沙箱根目录限制。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::storage::{Storage, StorageError, open_regular_file};

/// 决定调用方提供的文件路径如何映射到磁盘。
#[derive(Clone, Debug, Default)]
pub struct SourcePolicy {
    sandbox: Option<Storage>,
}

impl SourcePolicy {
    /// 不做任何限制：调用方可读取进程可见的任何文件。
    pub fn unrestricted() -> Self {
        Self { sandbox: None }
    }

    pub fn sandboxed(root: PathBuf) -> Self {
        Self {
            sandbox: Some(Storage::new(root)),
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandbox.is_some()
    }

    /// 解析 JSON 请求体中的路径：无沙箱时按原样使用（相对路径基于工作目录）。
    pub async fn resolve(&self, raw: &str) -> Result<PathBuf, StorageError> {
        match &self.sandbox {
            Some(root) => root.resolve_path_checked(raw, false).await,
            None => Ok(PathBuf::from(raw)),
        }
    }

    /// 解析 URL 中捕获的路径：无沙箱时总是视为绝对路径。
    pub async fn resolve_url_path(&self, captured: &str) -> Result<PathBuf, StorageError> {
        match &self.sandbox {
            Some(root) => root.resolve_path_checked(captured, false).await,
            None => Ok(Path::new("/").join(captured.trim_start_matches('/'))),
        }
    }
}

/// 以 image/jpeg 返回任意路径的文件内容。
pub async fn serve_arbitrary(
    AxumPath(filepath): AxumPath<String>,
    Extension(policy): Extension<Arc<SourcePolicy>>,
) -> Result<Response, ApiError> {
    let target = policy
        .resolve_url_path(&filepath)
        .await
        .map_err(|err| not_found_or(err, &filepath))?;
    let (file, metadata) = open_regular_file(&target)
        .await
        .map_err(|err| not_found_or(err, &filepath))?;
    debug!(path = ?target, size = metadata.len(), "viewer read");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn not_found_or(err: StorageError, requested: &str) -> ApiError {
    if err.is_not_found() {
        warn!(path = requested, "viewer target not found");
        return ApiError::NotFound("File does not exist".into());
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unrestricted_reads_absolute_path_as_jpeg() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("pano.png");
        std::fs::write(&source, b"png bytes").expect("write source");
        let captured = source.to_string_lossy().trim_start_matches('/').to_string();

        let response = serve_arbitrary(
            AxumPath(captured),
            Extension(Arc::new(SourcePolicy::unrestricted())),
        )
        .await
        .expect("viewer read");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("image/jpeg"))
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(&body[..], b"png bytes");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("nope.jpg");
        let result = serve_arbitrary(
            AxumPath(missing.to_string_lossy().into_owned()),
            Extension(Arc::new(SourcePolicy::unrestricted())),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn sandbox_blocks_traversal() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("sandbox");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(temp.path().join("secret.jpg"), b"secret").expect("write");
        std::fs::write(root.join("inside.jpg"), b"inside").expect("write");
        let policy = Arc::new(SourcePolicy::sandboxed(root));

        let result = serve_arbitrary(
            AxumPath("../secret.jpg".to_string()),
            Extension(policy.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let response = serve_arbitrary(AxumPath("inside.jpg".to_string()), Extension(policy))
            .await
            .expect("sandboxed read");
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(&body[..], b"inside");
    }
}
