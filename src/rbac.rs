use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    pin::Pin,
    str::FromStr,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{auth::AuthUser, error::AppError};

/// Permission
///
/// One atomic capability. Checked by the permission gate before any handler runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Permission {
    Read,
    Write,
    Update,
    Delete,
}

/// Role
///
/// A named bundle of permissions, assigned once per identity at registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Role {
    Admin,
    Writer,
    Visitor,
}

/// Ordered set of permissions. Ordered so that tokens and stored rows serialize the same
/// set the same way every time.
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::Update => "UPDATE",
            Permission::Delete => "DELETE",
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Writer => "WRITER",
            Role::Visitor => "VISITOR",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Permission::Read),
            "WRITE" => Ok(Permission::Write),
            "UPDATE" => Ok(Permission::Update),
            "DELETE" => Ok(Permission::Delete),
            other => Err(format!("unknown permission '{other}'")),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "WRITER" => Ok(Role::Writer),
            "VISITOR" => Ok(Role::Visitor),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// RoleCatalog
///
/// The single role → permission table. Built once at startup, shared read-only through
/// `AppState`, and consulted only when an identity is created. Stored identities keep a
/// snapshot of the set they were granted, so editing the catalog never changes existing users.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    table: BTreeMap<Role, PermissionSet>,
    default_role: Role,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        let table = BTreeMap::from([
            (
                Role::Admin,
                PermissionSet::from([
                    Permission::Read,
                    Permission::Write,
                    Permission::Delete,
                    Permission::Update,
                ]),
            ),
            (
                Role::Writer,
                PermissionSet::from([Permission::Read, Permission::Write]),
            ),
            (Role::Visitor, PermissionSet::from([Permission::Read])),
        ]);
        Self {
            table,
            default_role: Role::Visitor,
        }
    }
}

impl RoleCatalog {
    /// Role assigned when registration does not name one.
    pub fn default_role(&self) -> Role {
        self.default_role
    }

    /// Baseline permission set of `role`. A role absent from the table grants nothing.
    pub fn permissions_for(&self, role: Role) -> PermissionSet {
        self.table.get(&role).cloned().unwrap_or_default()
    }

    /// True when `granted` holds anything beyond the baseline of `role`.
    pub fn exceeds_baseline(&self, role: Role, granted: &PermissionSet) -> bool {
        !granted.is_subset(&self.permissions_for(role))
    }
}

/// check_permissions
///
/// The pure permission-gate decision: succeeds iff `required ⊆ identity.permissions`.
/// A missing identity is reported as unauthenticated rather than treated as empty.
pub fn check_permissions(
    identity: Option<&AuthUser>,
    required: &PermissionSet,
) -> Result<(), AppError> {
    let Some(user) = identity else {
        tracing::debug!(required = ?required, "permission gate reached without identity");
        return Err(AppError::missing_token());
    };

    if required.is_subset(&user.permissions) {
        return Ok(());
    }

    tracing::info!(
        user_id = %user.id,
        required = ?required,
        granted = ?user.permissions,
        "permission gate denied request"
    );
    Err(AppError::insufficient_permissions())
}

/// RequirePermissions
///
/// Route layer factory for the coarse permission check. It reads the `AuthUser` placed in
/// the request extensions by the authentication middleware, so it must sit inside that
/// middleware. Rejections short-circuit before any extractor or handler runs.
///
/// ```ignore
/// get(handlers::list_exercises).route_layer(RequirePermissions::new([Permission::Read]))
/// ```
#[derive(Debug, Clone)]
pub struct RequirePermissions {
    required: Arc<PermissionSet>,
}

impl RequirePermissions {
    pub fn new(required: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            required: Arc::new(required.into_iter().collect()),
        }
    }
}

impl<S> Layer<S> for RequirePermissions {
    type Service = RequirePermissionsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionsService {
            inner,
            required: self.required.clone(),
        }
    }
}

/// Service produced by [`RequirePermissions`].
#[derive(Debug, Clone)]
pub struct RequirePermissionsService<S> {
    inner: S,
    required: Arc<PermissionSet>,
}

impl<S> Service<Request> for RequirePermissionsService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let identity = request.extensions().get::<AuthUser>();
        if let Err(rejection) = check_permissions(identity, &self.required) {
            return Box::pin(async move { Ok(rejection.into_response()) });
        }
        Box::pin(self.inner.call(request))
    }
}
