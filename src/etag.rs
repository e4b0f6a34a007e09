//! ETag 计算与条件 GET 校验。

use axum::http::{HeaderMap, header};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    let modified = metadata.modified().ok();
    if let Some(modified) = modified
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// If-None-Match 命中当前 ETag 时返回 true（应答 304）。
pub fn is_not_modified(headers: &HeaderMap, current_etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value.trim() == "*"
        || value
            .split(',')
            .map(|item| item.trim())
            .any(|item| item == current_etag)
}

#[cfg(test)]
mod tests {
    use super::is_not_modified;
    use axum::http::{HeaderMap, HeaderValue, header};

    #[test]
    fn matches_listed_etag() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("W/\"1\", W/\"3-10-0\""),
        );
        assert!(is_not_modified(&headers, "W/\"3-10-0\""));
        assert!(!is_not_modified(&headers, "W/\"4-10-0\""));
        assert!(!is_not_modified(&HeaderMap::new(), "W/\"1\""));
    }
}
