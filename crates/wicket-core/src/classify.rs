use std::sync::Arc;

use wicket_common::Config;
use wicket_transport::{Scheme, TargetUrl};

use crate::error::ProxyError;
use crate::routes::{Route, RouteTable};

/// Where a classified request is headed.
#[derive(Debug)]
pub enum RouteTarget {
    Preset {
        route: Arc<Route>,
        target: TargetUrl,
    },
    Generic {
        target: TargetUrl,
    },
}

impl RouteTarget {
    pub fn target(&self) -> &TargetUrl {
        match self {
            RouteTarget::Preset { target, .. } => target,
            RouteTarget::Generic { target } => target,
        }
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        match self {
            RouteTarget::Preset { route, .. } => Some(route),
            RouteTarget::Generic { .. } => None,
        }
    }
}

/// Resolves the path grammar and the auth gate in one pass.
///
/// ```text
/// /<preset>/...                      public, unless PRESET_AUTH_ENABLED
/// /<token>/<preset>/...              always accepted
/// /<token>/<scheme>/<host>/<path>    generic pass-through, token required
/// ```
pub fn classify_path(
    config: &Config,
    routes: &RouteTable,
    path: &str,
    query: Option<&str>,
) -> Result<RouteTarget, ProxyError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(first) = segments.first().copied() else {
        return Err(ProxyError::bad_request("missing target path"));
    };

    if token_matches(config, first) {
        let rest = &segments[1..];
        let Some(head) = rest.first().copied() else {
            return Err(ProxyError::bad_request("token without a target"));
        };
        if Scheme::parse(head).is_some() {
            return classify_generic(rest, query);
        }
        if let Some(route) = routes.get(head) {
            return classify_preset(route, &rest[1..], query);
        }
        return Err(ProxyError::bad_request(format!(
            "unknown target after token: {head}"
        )));
    }

    if let Some(route) = routes.get(first) {
        if config.preset_auth_enabled {
            return Err(ProxyError::unauthorized(
                "preset routes require the auth token prefix",
            ));
        }
        return classify_preset(route, &segments[1..], query);
    }

    Err(ProxyError::unauthorized("invalid or missing auth token"))
}

fn token_matches(config: &Config, segment: &str) -> bool {
    config
        .auth_token
        .as_deref()
        .is_some_and(|token| !token.is_empty() && segment == token)
}

fn classify_preset(
    route: Arc<Route>,
    rest: &[&str],
    query: Option<&str>,
) -> Result<RouteTarget, ProxyError> {
    let rest = rest.join("/");
    let target = route
        .resolve(&rest, query)
        .map_err(|err| ProxyError::internal(format!("route {}: {err}", route.id)))?;
    Ok(RouteTarget::Preset { route, target })
}

fn classify_generic(segments: &[&str], query: Option<&str>) -> Result<RouteTarget, ProxyError> {
    let scheme = segments
        .first()
        .and_then(|s| Scheme::parse(s))
        .ok_or_else(|| ProxyError::bad_request("unsupported scheme"))?;
    let host = segments
        .get(1)
        .copied()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::bad_request("missing host in generic target"))?;

    let (host, port) = match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProxyError::bad_request(format!("invalid port: {host}")))?;
            (name.to_string(), Some(port))
        }
        _ => (host.to_string(), None),
    };

    let mut path = format!("/{}", segments[2..].join("/"));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }

    Ok(RouteTarget::Generic {
        target: TargetUrl {
            scheme,
            host,
            port,
            path_and_query: path,
        },
    })
}
