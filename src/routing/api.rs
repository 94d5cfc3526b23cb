//! Read/write API routing.
//!
//! API calls live under `/wsapi/<operation>`. Each known operation has one
//! method and either reads (identity service) or writes (database writer).
//! Unknown operations and wrong methods are not claimed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};

use crate::routing::matcher::Matcher;
use crate::routing::rule::{RouteRule, RouteStage};
use crate::routing::origin::Upstream;

pub const API_PREFIX: &str = "/wsapi/";

/// One entry of the operation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    /// `true` for POST operations, `false` for GET.
    pub post: bool,
    pub writes: bool,
}

const fn get(name: &'static str) -> Operation {
    Operation { name, post: false, writes: false }
}

const fn post_read(name: &'static str) -> Operation {
    Operation { name, post: true, writes: false }
}

const fn post_write(name: &'static str) -> Operation {
    Operation { name, post: true, writes: true }
}

pub const OPERATIONS: &[Operation] = &[
    get("address_info"),
    get("email_addition_status"),
    get("email_for_token"),
    get("have_email"),
    get("list_emails"),
    get("password_reset_status"),
    get("session_context"),
    get("user_creation_status"),
    post_read("authenticate_user"),
    post_read("cert_key"),
    post_read("interaction_data"),
    post_read("logout"),
    post_read("prolong_session"),
    post_write("account_cancel"),
    post_write("add_email_with_assertion"),
    post_write("auth_with_assertion"),
    post_write("complete_email_confirmation"),
    post_write("complete_reset"),
    post_write("complete_transition_to_secondary"),
    post_write("complete_user_creation"),
    post_write("remove_email"),
    post_write("stage_email"),
    post_write("stage_reset"),
    post_write("stage_reverify"),
    post_write("stage_transition"),
    post_write("stage_user"),
    post_write("update_password"),
    post_write("used_address_as_primary"),
];

/// Look up the operation a request invokes, if it is a known API call with
/// the right method.
pub fn operation_for(method: &Method, path: &str) -> Option<&'static Operation> {
    let name = path.strip_prefix(API_PREFIX)?;
    let op = OPERATIONS.iter().find(|op| op.name == name)?;
    let allowed = if op.post {
        method == Method::POST
    } else {
        method == Method::GET || method == Method::HEAD
    };
    allowed.then_some(op)
}

/// Matches known API calls whose write flag equals `writes`.
#[derive(Debug, Clone)]
pub struct ApiMatcher {
    writes: bool,
}

impl Matcher for ApiMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        operation_for(req.method(), req.uri().path())
            .map(|op| op.writes == self.writes)
            .unwrap_or(false)
    }
}

/// Reads go to `read`, writes go to `write`.
pub fn api_stage(read: Arc<Upstream>, write: Arc<Upstream>) -> RouteStage {
    RouteStage::new(
        "api",
        vec![
            RouteRule::forward("api_write", ApiMatcher { writes: true }, write),
            RouteRule::forward("api_read", ApiMatcher { writes: false }, read),
        ],
    )
}
