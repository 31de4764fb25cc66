//! One-shot notices carried across a redirect in a cookie.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{LOCATION, SET_COOKIE},
        request::Parts,
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

pub const NOTICE_COOKIE_NAME: &str = "notices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

/// Notices left by the previous response, consumed by the page rendering now.
#[derive(Debug, Default, Clone)]
pub struct Notices(pub Vec<Notice>);

#[async_trait]
impl<S> FromRequestParts<S> for Notices
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let notices = TypedHeader::<Cookie>::from_request_parts(parts, state)
            .await
            .ok()
            .and_then(|TypedHeader(cookies)| cookies.get(NOTICE_COOKIE_NAME).map(decode_notices))
            .unwrap_or_default();
        Ok(Notices(notices))
    }
}

/// A `303 See Other` redirect, optionally carrying notices for the next page.
pub struct Redirect {
    location: String,
    notices: Vec<Notice>,
    cookies: Vec<HeaderValue>,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            notices: Vec::new(),
            cookies: Vec::new(),
        }
    }

    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }

    pub fn with_cookie(mut self, cookie: HeaderValue) -> Self {
        self.cookies.push(cookie);
        self
    }
}

impl IntoResponse for Redirect {
    fn into_response(self) -> Response {
        let mut response = StatusCode::SEE_OTHER.into_response();
        let headers = response.headers_mut();
        match HeaderValue::from_str(&self.location) {
            Ok(location) => {
                headers.insert(LOCATION, location);
            }
            Err(_) => {
                headers.insert(LOCATION, HeaderValue::from_static("/"));
            }
        }
        for cookie in self.cookies {
            headers.append(SET_COOKIE, cookie);
        }
        if !self.notices.is_empty() {
            if let Some(cookie) = notice_cookie(&self.notices) {
                headers.append(SET_COOKIE, cookie);
            }
        }
        response
    }
}

/// A page context rendered as JSON, with any pending notices attached and
/// the notice cookie cleared.
pub struct Rendered<T> {
    notices: Vec<Notice>,
    context: T,
}

impl<T: Serialize> Rendered<T> {
    pub fn new(notices: Notices, context: T) -> Self {
        Self {
            notices: notices.0,
            context,
        }
    }
}

#[derive(Serialize)]
struct RenderedBody<'a, T> {
    #[serde(skip_serializing_if = "no_notices")]
    notices: &'a [Notice],
    #[serde(flatten)]
    context: &'a T,
}

fn no_notices(notices: &&[Notice]) -> bool {
    notices.is_empty()
}

impl<T: Serialize> IntoResponse for Rendered<T> {
    fn into_response(self) -> Response {
        let body = RenderedBody {
            notices: &self.notices,
            context: &self.context,
        };
        let mut response = Json(body).into_response();
        if !self.notices.is_empty() {
            response
                .headers_mut()
                .append(SET_COOKIE, clear_notice_cookie());
        }
        response
    }
}

fn notice_cookie(notices: &[Notice]) -> Option<HeaderValue> {
    let encoded = encode_notices(notices)?;
    HeaderValue::from_str(&format!(
        "{NOTICE_COOKIE_NAME}={encoded}; Path=/; HttpOnly; SameSite=Lax"
    ))
    .ok()
}

fn clear_notice_cookie() -> HeaderValue {
    HeaderValue::from_static("notices=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn encode_notices(notices: &[Notice]) -> Option<String> {
    let json = serde_json::to_string(notices).ok()?;
    Some(utf8_percent_encode(&json, NON_ALPHANUMERIC).to_string())
}

fn decode_notices(raw: &str) -> Vec<Notice> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}
