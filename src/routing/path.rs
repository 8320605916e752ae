//! Path canonicalization shared by custom-router mounting and shadow detection.

/// Canonical mount form: leading slash, no `api` prefix, no empty or trailing segments,
/// and `{name}` parameters rewritten to axum's `:name`.
/// e.g. "api/users/" -> "/users", "/api//users/{id}" -> "/users/:id"
pub fn canonical_path(path: &str) -> String {
    let mut segments: Vec<String> = path
        .trim()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            Some(name) => format!(":{}", name),
            None => s.to_string(),
        })
        .collect();
    if segments.first().map(String::as_str) == Some("api") {
        segments.remove(0);
    }
    format!("/{}", segments.join("/"))
}

/// Comparison key: canonical path with every parameter name erased, so `/users/:id`
/// and `/users/:userId` address the same route.
pub fn route_key(path: &str) -> String {
    canonical_path(path)
        .split('/')
        .map(|s| if s.starts_with(':') { ":" } else { s })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a prefix and a relative route path (`"/users"` + `"/:id"`).
pub fn join(prefix: &str, rest: &str) -> String {
    canonical_path(&format!("{}/{}", prefix, rest))
}

/// Where each parameter sits: `(erased prefix, name)` pairs. Two paths sharing a prefix
/// must use the same name there, e.g. `/users/:id` cannot coexist with `/users/:userId/stats`.
pub fn param_slots(path: &str) -> Vec<(String, String)> {
    let mut prefix = String::new();
    let mut slots = Vec::new();
    for segment in canonical_path(path).split('/').filter(|s| !s.is_empty()) {
        match segment.strip_prefix(':') {
            Some(name) => {
                slots.push((prefix.clone(), name.to_string()));
                prefix.push_str("/:");
            }
            None => {
                prefix.push('/');
                prefix.push_str(segment);
            }
        }
    }
    slots
}
