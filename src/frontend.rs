//! 嵌入式全景查看器页面与静态资源。

use axum::Json;
use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::motion::MotionConfig;

#[derive(RustEmbed)]
#[folder = "frontend"]
/// 嵌入式查看器资源。
pub struct FrontendAssets;

const PAGE_TEMPLATE: &str = "index.html";
const CONFIG_PLACEHOLDER: &str = "__PANO_CONFIG__";
const FORM_PLACEHOLDER: &str = "<!-- upload-form -->";
const UPLOAD_FORM: &str = r#"<form action="/" method="post" enctype="multipart/form-data" class="upload-form">
      <input type="file" name="file" accept=".png,.jpg,.jpeg">
      <button type="submit">Upload</button>
    </form>"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageConfig<'a> {
    image_url: Option<&'a str>,
    motion: &'a MotionConfig,
}

/// 渲染查看器页面：没有图片时显示上传表单。
pub fn render_page(image_url: Option<&str>, motion: &MotionConfig) -> Result<Html<String>, ApiError> {
    let template = FrontendAssets::get(PAGE_TEMPLATE)
        .ok_or_else(|| ApiError::Internal("page template missing".into()))?;
    let template = std::str::from_utf8(&template.data)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let config = serde_json::to_string(&PageConfig { image_url, motion })
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let form = if image_url.is_some() { "" } else { UPLOAD_FORM };

    Ok(Html(
        template
            .replace(FORM_PLACEHOLDER, form)
            .replace(CONFIG_PLACEHOLDER, &escape_script_json(&config)),
    ))
}

/// JSON 内嵌到 <script> 中时转义可能提前闭合标签的字符。
fn escape_script_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

pub async fn index(
    Extension(motion): Extension<Arc<MotionConfig>>,
) -> Result<Html<String>, ApiError> {
    render_page(None, &motion)
}

pub async fn motion_config(
    Extension(motion): Extension<Arc<MotionConfig>>,
) -> Json<MotionConfig> {
    Json(motion.as_ref().clone())
}

/// 返回查看器脚本与样式。
pub async fn serve_asset(AxumPath(path): AxumPath<String>) -> Result<Response, ApiError> {
    if path == PAGE_TEMPLATE {
        return Err(ApiError::NotFound("not found".into()));
    }
    let Some(asset) = FrontendAssets::get(&path) else {
        return Err(ApiError::NotFound("not found".into()));
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    Ok((headers, AxumBody::from(asset.data.into_owned())).into_response())
}
