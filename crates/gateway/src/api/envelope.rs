//! The response envelope and its localized message catalog.
//!
//! Every business response is HTTP 200 with `{code, message, data,
//! traceId}`. Non-zero codes carry a localized catalog message; the
//! concrete error detail rides inside `data.detail`. HTTP status codes
//! other than 200 are reserved for transport failures.

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use es_domain::error::Error;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
    #[serde(rename = "traceId")]
    pub trace_id: String,
}

/// Successful envelope.
pub fn ok<T: Serialize>(locale: &str, data: T) -> Response {
    Json(Envelope {
        code: 0,
        message: message_for(0, locale).to_string(),
        data: Some(data),
        trace_id: Uuid::new_v4().to_string(),
    })
    .into_response()
}

/// Business-error envelope (still HTTP 200).
pub fn fail(locale: &str, err: &Error) -> Response {
    let code = err.code();
    tracing::debug!(code, error = %err, "request failed");
    Json(Envelope {
        code,
        message: message_for(code, locale).to_string(),
        data: Some(json!({ "detail": err.to_string() })),
        trace_id: Uuid::new_v4().to_string(),
    })
    .into_response()
}

/// Resolve the response locale from `Accept-Language`. Supported: `zh`
/// (default fallback) and `en`.
pub fn locale_from(headers: &HeaderMap, default_locale: &str) -> String {
    let accept = headers
        .get(axum::http::header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    for part in accept.split(',') {
        let tag = part.split(';').next().unwrap_or("").trim().to_lowercase();
        if tag.starts_with("en") {
            return "en".into();
        }
        if tag.starts_with("zh") {
            return "zh".into();
        }
    }
    if default_locale == "en" {
        "en".into()
    } else {
        "zh".into()
    }
}

/// Localized catalog message per code range.
pub fn message_for(code: i32, locale: &str) -> &'static str {
    let en = locale == "en";
    match code {
        0 => {
            if en {
                "ok"
            } else {
                "成功"
            }
        }
        40000..=40099 => {
            if en {
                "invalid parameter"
            } else {
                "参数错误"
            }
        }
        40100..=40199 => {
            if en {
                "authentication required"
            } else {
                "未认证"
            }
        }
        40300..=40399 => {
            if en {
                "permission denied"
            } else {
                "无权限"
            }
        }
        40400..=40499 => {
            if en {
                "resource not found"
            } else {
                "资源不存在"
            }
        }
        40910 => {
            if en {
                "provider quota exhausted"
            } else {
                "该服务商配额已用尽"
            }
        }
        40911 => {
            if en {
                "all transcription quotas exhausted"
            } else {
                "所有转写配额已用尽"
            }
        }
        40900..=40999 => {
            if en {
                "operation conflict"
            } else {
                "操作冲突"
            }
        }
        51000..=51999 => {
            if en {
                "upstream service error"
            } else {
                "第三方服务异常"
            }
        }
        _ => {
            if en {
                "internal error"
            } else {
                "系统内部错误"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::ACCEPT_LANGUAGE;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(ACCEPT_LANGUAGE, value.parse().unwrap());
        h
    }

    #[test]
    fn locale_prefers_first_supported_tag() {
        assert_eq!(locale_from(&headers("en-US,en;q=0.9"), "zh"), "en");
        assert_eq!(locale_from(&headers("zh-CN,zh;q=0.9,en;q=0.5"), "zh"), "zh");
        assert_eq!(locale_from(&headers("fr-FR"), "zh"), "zh");
        assert_eq!(locale_from(&HeaderMap::new(), "zh"), "zh");
        assert_eq!(locale_from(&HeaderMap::new(), "en"), "en");
    }

    #[test]
    fn code_ranges_map_to_catalog_messages() {
        assert_eq!(message_for(0, "en"), "ok");
        assert_eq!(message_for(40001, "en"), "invalid parameter");
        assert_eq!(message_for(40910, "zh"), "该服务商配额已用尽");
        assert_eq!(message_for(40911, "en"), "all transcription quotas exhausted");
        assert_eq!(message_for(51000, "zh"), "第三方服务异常");
        assert_eq!(message_for(50000, "en"), "internal error");
    }

    #[test]
    fn error_maps_to_its_wire_code() {
        let err = Error::NotFound("task x".into());
        assert_eq!(err.code(), 40400);
        assert_eq!(message_for(err.code(), "en"), "resource not found");
    }
}
