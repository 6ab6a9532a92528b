//! The request pipeline (§4.3): a single ordered middleware that resolves a tenant, applies CORS,
//! enforces the control-plane firewall, authorises the caller, and rate-limits, attaching the
//! result to request extensions for handlers to read. Folding every step into one
//! `axum::middleware::from_fn_with_state` rather than a stack of independent `tower::Layer`s
//! keeps the ordering explicit and lets later steps see earlier ones' decisions (CORS needs the
//! resolved role; rate limiting needs the resolved slug) without fighting over shared state.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use cascata_core::project::{Project, ProjectSecrets};

use crate::auth::{self, AuthInputs, Authorisation, Role};
use crate::directory::{self, Resolution};
use crate::error::ApiError;
use crate::rate_limit;
use crate::state::AppState;

/// Paths that are never tenant-scoped and bypass tenant resolution, CORS, and rate limiting
/// entirely (§10.6 "Health and readiness").
const UNGATED_PATHS: &[&str] = &["/healthz", "/readyz"];

/// Control-plane routes that must work without an admin bearer yet (the login itself, and the
/// cheap liveness check the admin UI polls).
const CONTROL_PLANE_OPEN_PATHS: &[&str] = &["/api/control/auth/login", "/api/control/auth/verify"];

const DEFAULT_MAX_BODY_BYTES: u64 = 5 * 1024 * 1024;

/// Attached to the request by the pipeline; handlers pull this out with an `Extension` extractor.
#[derive(Clone)]
pub struct RequestContext {
    pub project: Project,
    pub secrets: ProjectSecrets,
    pub role: Role,
    pub authorisation: Authorisation,
    pub is_verified_admin: bool,
}

fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn apikey_from(headers: &HeaderMap) -> Option<&str> {
    headers.get("apikey").and_then(|v| v.to_str().ok())
}

fn client_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

pub async fn run(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if UNGATED_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let headers = request.headers().clone();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let bearer = bearer_from(&headers);
    let is_verified_admin = auth::is_verified_admin(bearer, &state.admin_signer);

    let resolution = match state
        .directory
        .resolve(&host, &path, &state.panic_shield, is_verified_admin)
        .await
    {
        Ok(resolution) => resolution,
        Err(err) => return apply_security_headers(err.into_response()),
    };

    match resolution {
        Resolution::ControlPlaneBypass => {
            if CONTROL_PLANE_OPEN_PATHS.contains(&path.as_str()) || is_verified_admin {
                apply_security_headers(next.run(request).await)
            } else {
                apply_security_headers(ApiError::unauthorized("admin token required").into_response())
            }
        }
        Resolution::Project { project, secrets } => {
            handle_tenant_request(state, project, secrets, is_verified_admin, method, headers, request, next).await
        }
    }
}

async fn handle_tenant_request(
    state: AppState,
    project: Project,
    secrets: ProjectSecrets,
    is_verified_admin: bool,
    method: Method,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if project.blocklist.iter().any(|blocked| blocked == client_ip(&headers)) {
        return apply_security_headers(ApiError::forbidden("client ip is blocklisted").into_response());
    }

    let origin = client_origin(&headers);
    if method == Method::OPTIONS {
        let Some(origin) = origin else {
            return apply_security_headers(StatusCode::NO_CONTENT.into_response());
        };
        let mut response = StatusCode::NO_CONTENT.into_response();
        if let Some(allowed) = crate::cors::allowed_origin(&project, origin, None) {
            crate::cors::apply_headers(response.headers_mut(), allowed);
        }
        return apply_security_headers(response);
    }

    let apikey = apikey_from(&headers);
    let auth_inputs = AuthInputs {
        bearer: bearer_from(&headers),
        apikey,
        path: request.uri().path(),
        is_verified_admin,
    };
    let authorisation = match auth::authorise(&auth_inputs, &project, &secrets) {
        Ok(authorisation) => authorisation,
        Err(err) => return apply_security_headers(err.into_response()),
    };

    if let Some(max) = max_body_bytes(&project) {
        if let Some(declared) = content_length(&headers) {
            if declared > max {
                return apply_security_headers(
                    ApiError::payload_too_large(format!("body exceeds {max} bytes")).into_response(),
                );
            }
        }
    }

    let outcome = rate_limit::check(
        state.panic_shield.redis_handle(),
        &project.slug,
        &authorisation.role,
    )
    .await;
    if !outcome.allowed {
        let mut response = ApiError::rate_limited("rate limit exceeded").into_response();
        apply_rate_limit_headers(&mut response, &outcome);
        return apply_security_headers(response);
    }

    let role = authorisation.role.clone();
    request.extensions_mut().insert(RequestContext {
        project: project.clone(),
        secrets,
        role,
        authorisation,
        is_verified_admin,
    });

    let mut response = next.run(request).await;
    if let Some(origin) = origin {
        if let Some(allowed) =
            crate::cors::allowed_origin(&project, origin, request_context_role(&response))
        {
            crate::cors::apply_headers(response.headers_mut(), allowed);
        }
    }
    apply_rate_limit_headers(&mut response, &outcome);
    apply_security_headers(response)
}

/// CORS for the actual (non-preflight) response re-derives the role from what the request carried
/// in rather than re-running authorisation; by the time we're building the response the
/// extensions have already been consumed by `next.run`, so this always returns `None` and callers
/// fall back to the unauthenticated origin policy. Kept as a named seam rather than inlined
/// `None` so a future per-response role echo is a one-line change.
fn request_context_role(_response: &Response) -> Option<&Role> {
    None
}

fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("")
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn max_body_bytes(project: &Project) -> Option<u64> {
    Some(project.metadata.security.max_json_size.unwrap_or(DEFAULT_MAX_BODY_BYTES))
}

fn apply_rate_limit_headers(response: &mut Response, outcome: &rate_limit::RateLimitOutcome) {
    let headers = response.headers_mut();
    if let Ok(v) = outcome.limit.to_string().parse() {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = outcome.remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = outcome.reset_seconds.to_string().parse() {
        headers.insert("x-ratelimit-reset", v);
    }
    if !outcome.allowed {
        if let Ok(v) = rate_limit::retry_after().as_secs().to_string().parse() {
            headers.insert(header::RETRY_AFTER, v);
        }
    }
}

/// A minimal fixed set of security headers applied to every response, tenant or control-plane
/// (§4.3 "security headers").
fn apply_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", "nosniff".parse().unwrap());
    headers.insert("x-frame-options", "DENY".parse().unwrap());
    headers.insert("referrer-policy", "no-referrer".parse().unwrap());
    response
}
