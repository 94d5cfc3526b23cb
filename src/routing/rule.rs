//! Route rules and the stages built from them.
//!
//! A [`RouteRule`] pairs a matcher with an action. A [`RouteStage`] evaluates
//! its rules in declaration order; the first match decides, and no match
//! passes the request on.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;

use crate::config::PublicConfig;
use crate::http::pipeline::{Flow, RequestContext, Stage};
use crate::routing::matcher::{AnyMatcher, HostMatcher, Matcher, PathMatcher};
use crate::routing::origin::Upstream;

/// Verifier endpoint on the router's own host.
pub const VERIFY_PATH: &str = "/verify";

/// Test-only passthrough to the identity service.
pub const FAKE_VERIFICATION_PATH: &str = "/wsapi/fake_verification";

#[derive(Debug, Clone)]
pub enum RouteAction {
    Forward(Arc<Upstream>),
    Continue,
}

#[derive(Debug)]
pub struct RouteRule {
    pub name: &'static str,
    pub matcher: Box<dyn Matcher>,
    pub action: RouteAction,
}

impl RouteRule {
    pub fn forward(name: &'static str, matcher: impl Matcher + 'static, upstream: Arc<Upstream>) -> Self {
        Self {
            name,
            matcher: Box::new(matcher),
            action: RouteAction::Forward(upstream),
        }
    }
}

/// A pipeline stage backed by an ordered rule list.
#[derive(Debug)]
pub struct RouteStage {
    name: &'static str,
    rules: Vec<RouteRule>,
}

impl RouteStage {
    pub fn new(name: &'static str, rules: Vec<RouteRule>) -> Self {
        Self { name, rules }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

impl Stage for RouteStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn on_request(&self, req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        match self.rules.iter().find(|rule| rule.matcher.matches(req)) {
            Some(RouteRule {
                action: RouteAction::Forward(upstream),
                ..
            }) => Flow::Forward(upstream.clone()),
            Some(_) | None => Flow::Continue,
        }
    }
}

/// Verifier redirection.
///
/// `/verify` always goes to the verifier. Requests addressed to the
/// verifier's public host go there too, but only when that host differs
/// from the router's own; otherwise every request would match.
///
/// Hosts are compared by authority, so the same hostname on a different
/// port counts as a distinct host.
pub fn verifier_stage(verifier: Arc<Upstream>, public: &PublicConfig) -> RouteStage {
    let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(PathMatcher::new(VERIFY_PATH))];

    let verifier_host = public.verifier.authority().as_str();
    if !verifier_host.eq_ignore_ascii_case(public.router.authority().as_str()) {
        matchers.push(Box::new(HostMatcher::new(verifier_host)));
    }

    RouteStage::new(
        "verifier",
        vec![RouteRule::forward("verifier", AnyMatcher::new(matchers), verifier)],
    )
}

/// Test-mode passthrough. Callers install this only when test mode is on.
pub fn fake_verification_stage(identity: Arc<Upstream>) -> RouteStage {
    RouteStage::new(
        "fake_verification",
        vec![RouteRule::forward(
            "fake_verification",
            PathMatcher::new(FAKE_VERIFICATION_PATH),
            identity,
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::origin::{Origin, Role};

    fn origin(raw: &str) -> Origin {
        Origin::resolve("TEST_URL", raw).unwrap()
    }

    fn run(stage: &RouteStage, uri: &str, host: &str) -> Flow {
        let mut req = Request::builder()
            .uri(uri)
            .header("Host", host)
            .body(Body::empty())
            .unwrap();
        let mut cx = RequestContext::new(&req);
        stage.on_request(&mut req, &mut cx)
    }

    fn forwarded_role(flow: Flow) -> Option<Role> {
        match flow {
            Flow::Forward(u) => Some(u.role),
            _ => None,
        }
    }

    #[test]
    fn verifier_matches_by_path_and_distinct_host() {
        let public = PublicConfig {
            router: origin("https://login.example.com"),
            verifier: origin("https://verifier.example.com"),
        };
        let stage = verifier_stage(Upstream::new(Role::Verifier, origin("http://127.0.0.1:10000")), &public);

        assert_eq!(forwarded_role(run(&stage, "/verify", "login.example.com")), Some(Role::Verifier));
        assert_eq!(forwarded_role(run(&stage, "/", "verifier.example.com")), Some(Role::Verifier));
        assert_eq!(forwarded_role(run(&stage, "/", "login.example.com")), None);
    }

    #[test]
    fn verifier_host_rule_is_off_when_hosts_coincide() {
        let public = PublicConfig {
            router: origin("https://login.example.com"),
            verifier: origin("https://LOGIN.example.com/some/path"),
        };
        let stage = verifier_stage(Upstream::new(Role::Verifier, origin("http://127.0.0.1:10000")), &public);

        // Path rule only.
        assert_eq!(stage.rules().len(), 1);
        assert_eq!(forwarded_role(run(&stage, "/verify", "login.example.com")), Some(Role::Verifier));
        assert_eq!(forwarded_role(run(&stage, "/index.html", "login.example.com")), None);
    }

    #[test]
    fn verifier_on_another_port_of_the_same_host_is_distinct() {
        let public = PublicConfig {
            router: origin("https://login.example.com"),
            verifier: origin("https://login.example.com:8443"),
        };
        let stage = verifier_stage(Upstream::new(Role::Verifier, origin("http://127.0.0.1:10000")), &public);

        assert_eq!(forwarded_role(run(&stage, "/", "login.example.com:8443")), Some(Role::Verifier));
        assert_eq!(forwarded_role(run(&stage, "/", "login.example.com")), None);
    }

    #[test]
    fn fake_verification_matches_single_path() {
        let stage = fake_verification_stage(Upstream::new(Role::Identity, origin("http://127.0.0.1:10003")));
        assert_eq!(
            forwarded_role(run(&stage, "/wsapi/fake_verification?email=a@b.c", "x")),
            Some(Role::Identity)
        );
        assert_eq!(forwarded_role(run(&stage, "/wsapi/fake_verification/x", "x")), None);
    }

    #[test]
    fn continue_action_stops_rule_scan() {
        let identity = Upstream::new(Role::Identity, origin("http://127.0.0.1:10003"));
        let stage = RouteStage::new(
            "test",
            vec![
                RouteRule {
                    name: "skip",
                    matcher: Box::new(PathMatcher::new("/a")),
                    action: RouteAction::Continue,
                },
                RouteRule::forward("later", PathMatcher::new("/a"), identity),
            ],
        );
        assert!(matches!(run(&stage, "/a", "x"), Flow::Continue));
    }
}
