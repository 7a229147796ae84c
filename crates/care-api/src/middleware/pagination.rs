//! # Pagination
//!
//! Reads `page` and `page_size` from the query string once per request and
//! stores the clamped [`PageRequest`] in the request extensions. List
//! handlers take the [`Pagination`] extractor. Unparseable values fall back
//! to the defaults rather than failing the request.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use care_core::PageRequest;

/// The clamped pagination request of the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination(pub PageRequest);

pub async fn pagination_middleware(mut request: Request, next: Next) -> Response {
    let page = parse(request.uri().query());
    request.extensions_mut().insert(Pagination(page));
    next.run(request).await
}

fn parse(query: Option<&str>) -> PageRequest {
    let mut page = None;
    let mut page_size = None;
    for pair in query.unwrap_or_default().split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "page" => page = value.parse::<i64>().ok(),
            "page_size" | "pageSize" => page_size = value.parse::<i64>().ok(),
            _ => {}
        }
    }
    PageRequest::new(page, page_size)
}

/// Falls back to the default page when the middleware did not run.
#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Pagination {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Pagination>()
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_clamped() {
        assert_eq!(parse(None), PageRequest::default());
        assert_eq!(parse(Some("page=3&page_size=25")), PageRequest::new(Some(3), Some(25)));
        assert_eq!(parse(Some("page=0&page_size=0")), PageRequest::default());
        assert_eq!(parse(Some("page_size=1000")).page_size, 100);
        assert_eq!(parse(Some("pageSize=5&status=in_care")).page_size, 5);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        assert_eq!(parse(Some("page=abc&page_size=")), PageRequest::default());
        assert_eq!(parse(Some("&&=")), PageRequest::default());
    }
}
