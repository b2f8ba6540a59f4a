use std::collections::HashMap;
use std::sync::Arc;

use wicket_common::Config;
use wicket_transport::{TargetUrl, TransportError};

/// One preset route. Immutable once the table is built.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    /// Upstream base URLs; the first entry is authoritative, the rest are
    /// informational mirrors.
    pub upstreams: Vec<String>,
    /// Skip the raw socket and go straight to the runtime client.
    pub prefer_client: bool,
    /// Treat generate requests as streaming even without `alt=sse`.
    pub force_stream: bool,
}

impl Route {
    fn new(id: &str, upstream: &str, prefer_client: bool) -> Self {
        Self {
            id: id.to_string(),
            upstreams: vec![upstream.to_string()],
            prefer_client,
            force_stream: false,
        }
    }

    pub fn primary_upstream(&self) -> &str {
        self.upstreams
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn is_gemini(&self) -> bool {
        self.id == "gemini"
            || self
                .upstreams
                .iter()
                .any(|u| u.contains("generativelanguage"))
    }

    /// Resolves a request path + query against this route's upstream base.
    pub fn resolve(&self, rest: &str, query: Option<&str>) -> Result<TargetUrl, TransportError> {
        join_upstream(self.primary_upstream(), rest, query)
    }
}

/// Joins an upstream base URL (which may itself carry a path prefix) with the
/// path remainder of the downstream request.
pub fn join_upstream(
    base: &str,
    rest: &str,
    query: Option<&str>,
) -> Result<TargetUrl, TransportError> {
    let mut target = TargetUrl::parse(base)?;
    let prefix = target.path_and_query.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    let mut path = if rest.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}/{rest}")
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }
    target.path_and_query = path;
    Ok(target)
}

/// Read-mostly preset catalog, built once at startup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    pub fn builtin(config: &Config) -> Self {
        let prefer = config.force_fetch_default;
        let mut routes = HashMap::new();
        for route in [
            Route::new("openai", "https://api.openai.com", prefer),
            Route::new("gemini", "https://generativelanguage.googleapis.com", prefer),
            Route::new("claude", "https://api.anthropic.com", prefer),
            Route::new("groq", "https://api.groq.com/openai", prefer),
            Route::new("mistral", "https://api.mistral.ai", prefer),
            Route::new("cohere", "https://api.cohere.ai", prefer),
            Route::new("xai", "https://api.x.ai", prefer),
            Route::new("openrouter", "https://openrouter.ai/api", prefer),
            Route::new("deepseek", "https://api.deepseek.com", prefer),
            Route::new("together", "https://api.together.xyz", prefer),
        ] {
            routes.insert(route.id.clone(), Arc::new(route));
        }
        if let Some(url) = config.default_dst_url.as_deref() {
            let route = Route::new("default", url, prefer);
            routes.insert(route.id.clone(), Arc::new(route));
        }
        Self { routes }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Route>> {
        self.routes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }
}
