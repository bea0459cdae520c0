//! Privilege gates: who may invoke a route.
//!
//! A gate runs before handler selection with the privilege label the route
//! requires. Any rejection, including a failure of the identity service the
//! gate consults, is answered with 401 and the rejection message.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::request::RouteRequest;
use super::selector::ANY_ROLE;

/// Label reserved for system administrators.
pub const SYS_ADMIN: &str = "sys-admin";

/// Header carrying the caller's access token.
pub const ACCESS_TOKEN_HEADER: &str = "access-token";

/// A privilege check that did not pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Unauthorized(pub String);

impl Unauthorized {
    fn generic() -> Self {
        Self("unauthorized".to_string())
    }
}

/// Decides whether a request may run a route requiring `label`.
#[async_trait]
pub trait PrivilegeGate: Send + Sync {
    async fn authorize(&self, label: &str, request: &RouteRequest) -> Result<(), Unauthorized>;
}

/// Gate that admits every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PrivilegeGate for AllowAll {
    async fn authorize(&self, _label: &str, _request: &RouteRequest) -> Result<(), Unauthorized> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity service
// ---------------------------------------------------------------------------

/// A user's membership in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub organization_subdomain: String,
    #[serde(default)]
    pub is_org_admin: bool,
}

/// External source of identities consulted by [`TokenPrivilegeGate`].
///
/// Role lookups receive the claims decoded from the caller's own token, so
/// one request is never judged by another request's credentials.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Returns the claims of a valid token, or `None` if it is not valid.
    async fn validate_token(&self, token: &str) -> anyhow::Result<Option<AccessClaims>>;

    async fn is_system_admin(&self, claims: &AccessClaims) -> anyhow::Result<bool>;

    async fn memberships(&self, claims: &AccessClaims) -> anyhow::Result<Vec<Membership>>;
}

// ---------------------------------------------------------------------------
// TokenPrivilegeGate
// ---------------------------------------------------------------------------

/// Token-based gate.
///
/// - label `any` passes without a token;
/// - otherwise the `access-token` header must name a valid user;
/// - system administrators pass every label;
/// - label `sys-admin` admits nobody else;
/// - a `subdomain` path parameter requires an admin membership in that
///   organization, else a `uid` path parameter must equal the caller's uid.
pub struct TokenPrivilegeGate {
    identity: Arc<dyn IdentityService>,
}

impl TokenPrivilegeGate {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityService>) -> Self {
        Self { identity }
    }

    async fn check(&self, label: &str, request: &RouteRequest) -> anyhow::Result<()> {
        let Some(token) = request.header(ACCESS_TOKEN_HEADER) else {
            anyhow::bail!("unauthorized");
        };
        let Some(claims) = self.identity.validate_token(token).await? else {
            anyhow::bail!("the user's token is invalid");
        };

        if self.identity.is_system_admin(&claims).await? {
            return Ok(());
        }
        if label == SYS_ADMIN {
            anyhow::bail!("the user has insufficient permissions");
        }

        if let Some(subdomain) = request.ctx.param("subdomain") {
            let memberships = self.identity.memberships(&claims).await?;
            let is_admin = memberships
                .iter()
                .any(|m| m.organization_subdomain == subdomain && m.is_org_admin);
            if !is_admin {
                anyhow::bail!("user is not an admin of {subdomain}");
            }
        } else if let Some(owner) = request.ctx.param("uid") {
            if owner != claims.sub {
                anyhow::bail!("unauthorized");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PrivilegeGate for TokenPrivilegeGate {
    async fn authorize(&self, label: &str, request: &RouteRequest) -> Result<(), Unauthorized> {
        if label == ANY_ROLE {
            return Ok(());
        }
        self.check(label, request).await.map_err(|e| {
            let message = e.to_string();
            if message.is_empty() {
                Unauthorized::generic()
            } else {
                Unauthorized(message)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// JwtIdentityService
// ---------------------------------------------------------------------------

/// Claims carried by access tokens understood by [`JwtIdentityService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub sys_admin: bool,
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

/// Identity service reading everything from HS256-signed JWTs.
///
/// Admin status and memberships come from the token's own claims.
pub struct JwtIdentityService {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityService {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityService for JwtIdentityService {
    async fn validate_token(&self, token: &str) -> anyhow::Result<Option<AccessClaims>> {
        match decode::<AccessClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(e) => {
                tracing::debug!(error = %e, "rejected access token");
                Ok(None)
            }
        }
    }

    async fn is_system_admin(&self, claims: &AccessClaims) -> anyhow::Result<bool> {
        Ok(claims.sys_admin)
    }

    async fn memberships(&self, claims: &AccessClaims) -> anyhow::Result<Vec<Membership>> {
        Ok(claims.memberships.clone())
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn token(sub: &str, sys_admin: bool, memberships: Vec<Membership>) -> String {
        let claims = AccessClaims {
            sub: sub.to_string(),
            exp: 4_102_444_800, // 2100-01-01
            sys_admin,
            memberships,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn gate() -> TokenPrivilegeGate {
        TokenPrivilegeGate::new(Arc::new(JwtIdentityService::new(SECRET)))
    }

    fn request(token: Option<&str>) -> RouteRequest {
        let req = RouteRequest::new(http::Method::GET, "/");
        match token {
            Some(t) => req.with_header(ACCESS_TOKEN_HEADER, t),
            None => req,
        }
    }

    #[tokio::test]
    async fn any_label_needs_no_token() {
        assert!(gate().authorize(ANY_ROLE, &request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_or_invalid_token_is_rejected() {
        let err = gate().authorize("member", &request(None)).await.unwrap_err();
        assert_eq!(err, Unauthorized("unauthorized".into()));

        let err = gate()
            .authorize("member", &request(Some("not-a-jwt")))
            .await
            .unwrap_err();
        assert_eq!(err.0, "the user's token is invalid");
    }

    #[tokio::test]
    async fn sys_admin_label() {
        let admin = token("root", true, vec![]);
        assert!(gate().authorize(SYS_ADMIN, &request(Some(&admin))).await.is_ok());

        let user = token("u1", false, vec![]);
        let err = gate().authorize(SYS_ADMIN, &request(Some(&user))).await.unwrap_err();
        assert_eq!(err.0, "the user has insufficient permissions");
    }

    #[tokio::test]
    async fn subdomain_requires_org_admin() {
        let admin_of_acme = token(
            "u1",
            false,
            vec![Membership {
                organization_subdomain: "acme".into(),
                is_org_admin: true,
            }],
        );
        let mut req = request(Some(&admin_of_acme));
        req.ctx = req.ctx.clone().with_param("subdomain", "acme");
        assert!(gate().authorize("org", &req).await.is_ok());

        let mut req = request(Some(&admin_of_acme));
        req.ctx = req.ctx.clone().with_param("subdomain", "globex");
        let err = gate().authorize("org", &req).await.unwrap_err();
        assert_eq!(err.0, "user is not an admin of globex");
    }

    #[tokio::test]
    async fn uid_param_must_match_token_owner() {
        let user = token("u1", false, vec![]);
        let mut req = request(Some(&user));
        req.ctx = req.ctx.clone().with_param("uid", "u1");
        assert!(gate().authorize("self", &req).await.is_ok());

        let mut req = request(Some(&user));
        req.ctx = req.ctx.clone().with_param("uid", "u2");
        assert!(gate().authorize("self", &req).await.is_err());
    }

    #[tokio::test]
    async fn claims_of_one_token_never_apply_to_another() {
        let identity = JwtIdentityService::new(SECRET);
        let demoted = identity
            .validate_token(&token("alice", false, vec![]))
            .await
            .unwrap()
            .unwrap();
        let old_admin = identity
            .validate_token(&token("alice", true, vec![]))
            .await
            .unwrap()
            .unwrap();

        assert!(!identity.is_system_admin(&demoted).await.unwrap());
        assert!(identity.is_system_admin(&old_admin).await.unwrap());
    }

    #[tokio::test]
    async fn gate_judges_each_request_by_its_own_token() {
        let gate = gate();
        let demoted = token("alice", false, vec![]);
        let old_admin = token("alice", true, vec![]);

        assert!(gate.authorize(SYS_ADMIN, &request(Some(&old_admin))).await.is_ok());
        let err = gate
            .authorize(SYS_ADMIN, &request(Some(&demoted)))
            .await
            .unwrap_err();
        assert_eq!(err.0, "the user has insufficient permissions");
    }

    #[tokio::test]
    async fn allow_all_admits_everything() {
        assert!(AllowAll.authorize(SYS_ADMIN, &request(None)).await.is_ok());
    }
}
