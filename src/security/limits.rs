//! Request body size limit.
//!
//! Requests that declare a `Content-Length` above the ceiling are answered
//! with 413 before any of the body is read. Bodies of unknown length are
//! wrapped so the ceiling is enforced while they stream upstream.

use axum::body::Body;
use axum::http::{
    header::{CONNECTION, CONTENT_LENGTH},
    HeaderValue, Request, StatusCode,
};
use axum::response::IntoResponse;
use http_body_util::Limited;
use hyper::body::Body as HttpBody;

use crate::http::pipeline::{Flow, RequestContext, Stage};

pub struct BodyLimitStage {
    max_bytes: u64,
}

impl BodyLimitStage {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Stage for BodyLimitStage {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    fn on_request(&self, req: &mut Request<Body>, cx: &mut RequestContext) -> Flow {
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        match declared {
            Some(length) if length > self.max_bytes => {
                tracing::debug!(
                    request_id = %cx.request_id,
                    content_length = length,
                    max_bytes = self.max_bytes,
                    "Request body exceeds size limit"
                );
                let mut response =
                    (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("close"));
                Flow::Respond(response)
            }
            Some(_) => Flow::Continue,
            None => {
                if HttpBody::size_hint(req.body()).exact() != Some(0) {
                    let limit = usize::try_from(self.max_bytes).unwrap_or(usize::MAX);
                    let body = std::mem::take(req.body_mut());
                    *req.body_mut() = Body::new(Limited::new(body, limit));
                }
                Flow::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use http_body_util::BodyExt;

    fn run(stage: &BodyLimitStage, req: &mut Request<Body>) -> Flow {
        let mut cx = RequestContext::new(req);
        stage.on_request(req, &mut cx)
    }

    #[test]
    fn rejects_declared_oversize() {
        let stage = BodyLimitStage::new(10 * 1024);
        let mut req = Request::builder()
            .method("POST")
            .uri("/wsapi/stage_user")
            .header("Content-Length", (15 * 1024).to_string())
            .body(Body::from(vec![b'x'; 15 * 1024]))
            .unwrap();

        match run(&stage, &mut req) {
            Flow::Respond(r) => {
                assert_eq!(r.status(), StatusCode::PAYLOAD_TOO_LARGE);
                assert_eq!(r.headers()["connection"], "close");
            }
            other => panic!("expected 413, got {other:?}"),
        }
    }

    #[test]
    fn accepts_declared_within_limit() {
        let stage = BodyLimitStage::new(10);
        let mut req = Request::builder()
            .header("Content-Length", "10")
            .body(Body::from("0123456789"))
            .unwrap();
        assert!(matches!(run(&stage, &mut req), Flow::Continue));
    }

    #[tokio::test]
    async fn streaming_body_is_capped() {
        let stage = BodyLimitStage::new(4);
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let mut req = Request::builder()
            .method("POST")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        assert!(matches!(run(&stage, &mut req), Flow::Continue));
        assert!(req.into_body().collect().await.is_err());
    }

    #[tokio::test]
    async fn streaming_body_within_limit_passes_through() {
        let stage = BodyLimitStage::new(16);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"hello"))];
        let mut req = Request::builder()
            .method("POST")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        assert!(matches!(run(&stage, &mut req), Flow::Continue));
        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }
}
