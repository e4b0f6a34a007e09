//! 图片上传、上传目录静态读取与拼接图落盘处理器。

use axum::Json;
use axum::body::Body as AxumBody;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Multipart, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::config::{ALLOWED_EXTENSIONS, STITCHED_FILENAME, UPLOAD_URL_PREFIX};
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::frontend::render_page;
use crate::motion::MotionConfig;
use crate::storage::Storage;
use crate::viewer::SourcePolicy;

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Deserialize)]
pub struct StitchRequest {
    filepath: Option<String>,
}

#[derive(Serialize)]
pub struct StitchResponse {
    message: &'static str,
    url: String,
}

/// 扩展名（最后一个 '.' 之后，大小写不敏感）是否在允许列表中。
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// 把客户端提供的文件名归一化为单层、ASCII 安全的名字。可能返回空串。
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(|c| c == '.' || c == '_');

    let stem = trimmed.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICE_NAMES.contains(&stem.to_ascii_uppercase().as_str()) {
        return format!("_{trimmed}");
    }
    trimmed.to_string()
}

pub fn upload_url(filename: &str) -> String {
    format!("{UPLOAD_URL_PREFIX}/{filename}")
}

/// 处理上传表单：成功时渲染带图片的页面，输入错误以纯文本返回。
pub async fn upload_form(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(motion): Extension<Arc<MotionConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match multipart {
        Ok(multipart) => save_upload(&storage, multipart).await,
        Err(rejection) => {
            debug!(error = %rejection, "upload request is not multipart");
            Err(ApiError::InvalidInput("No file part".into()))
        }
    };
    match result.and_then(|url| render_page(Some(&url), &motion)) {
        Ok(page) => page.into_response(),
        Err(err) => err.into_form_response(),
    }
}

/// 在表单中查找 `file` 文件字段并保存，返回可访问的 URL。
/// 没有 `filename` 参数的同名字段是普通表单值，不算文件。
async fn save_upload(storage: &Storage, mut multipart: Multipart) -> Result<String, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") || field.file_name().is_none() {
            continue;
        }
        return store_field(storage, field).await;
    }
    Err(ApiError::InvalidInput("No file part".into()))
}

async fn store_field(storage: &Storage, mut field: Field<'_>) -> Result<String, ApiError> {
    let original = field.file_name().unwrap_or_default().to_string();
    if original.is_empty() {
        return Err(ApiError::InvalidInput("No selected file".into()));
    }
    if !allowed_file(&original) {
        info!(filename = original, "rejected upload extension");
        return Err(ApiError::RejectedExtension("File type not allowed".into()));
    }
    let filename = secure_filename(&original);
    if filename.is_empty() {
        return Err(ApiError::InvalidInput("Invalid filename".into()));
    }

    let target = storage.resolve_path_checked(&filename, true).await?;
    let mut atomic = AtomicFile::new(&target).await?;
    let write_result: Result<u64, ApiError> = async {
        let mut total_written: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            total_written += chunk.len() as u64;
            atomic
                .file_mut()
                .write_all(&chunk)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
        }
        Ok(total_written)
    }
    .await;
    let total_written = match write_result {
        Ok(value) => value,
        Err(err) => {
            atomic.cleanup().await;
            return Err(err);
        }
    };
    atomic.finalize().await?;

    info!(filename, size = total_written, "upload saved");
    Ok(upload_url(&filename))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge(err.body_text());
    }
    ApiError::InvalidInput(err.body_text())
}

/// 读取上传目录中的文件，附带缓存相关响应头。
pub async fn serve_upload(
    AxumPath(filename): AxumPath<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let (file, metadata) = storage.open_file(&filename).await.map_err(|err| {
        if err.is_not_found() {
            ApiError::NotFound("File not found".into())
        } else {
            err.into()
        }
    })?;

    let etag = etag_from_metadata(&metadata);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }
    if is_not_modified(&request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    debug!(filename, size = metadata.len(), "serve upload");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 把外部拼接好的图片复制为上传目录下固定的 stitched_latest.jpg。
pub async fn finalize_stitched(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(policy): Extension<Arc<SourcePolicy>>,
    payload: Result<Json<StitchRequest>, JsonRejection>,
) -> Result<Json<StitchResponse>, ApiError> {
    let filepath = payload
        .ok()
        .and_then(|Json(body)| body.filepath)
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput("Filepath is required".into()))?;

    let source = policy.resolve(&filepath).await.map_err(|err| {
        if err.is_not_found() {
            ApiError::NotFound("File does not exist".into())
        } else {
            err.into()
        }
    })?;
    match fs::metadata(&source).await {
        Ok(metadata) if metadata.is_dir() => {
            return Err(ApiError::InvalidInput("Filepath is not a file".into()));
        }
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(filepath, "stitched source does not exist");
            return Err(ApiError::NotFound("File does not exist".into()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    }

    let copied = storage.copy_into(&source, STITCHED_FILENAME).await?;
    info!(source = ?source, size = copied, "stitched image stored");
    Ok(Json(StitchResponse {
        message: "Image processed successfully",
        url: upload_url(STITCHED_FILENAME),
    }))
}
