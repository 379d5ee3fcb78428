//! Ownership and visibility rules, evaluated per resource instance after the permission gate
//! has admitted the request.
//!
//! Read denials are reported as `NotFound` so that a caller cannot learn that a hidden
//! resource exists. Update and delete denials are `Forbidden`: the caller may already know
//! the resource (it can be public), and only its owner or an administrator may change it.

use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{Exercise, Visibility, Workout},
};

/// Instance-level action checked by [`authorize`]. Creation has no instance to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Delete,
}

/// Guarded
///
/// What the policy needs to know about a resource.
pub trait Guarded {
    /// Human-readable kind, used in error messages ("Exercise not found").
    const KIND: &'static str;

    fn owner(&self) -> Option<Uuid>;

    /// `None` for resource types without a visibility flag; those are private to their owner
    /// and administrators.
    fn visibility(&self) -> Option<Visibility>;
}

impl Guarded for Exercise {
    const KIND: &'static str = "Exercise";

    fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    fn visibility(&self) -> Option<Visibility> {
        Some(self.visibility)
    }
}

impl Guarded for Workout {
    const KIND: &'static str = "Workout";

    fn owner(&self) -> Option<Uuid> {
        Some(self.owner)
    }

    fn visibility(&self) -> Option<Visibility> {
        None
    }
}

pub fn not_found<R: Guarded>() -> AppError {
    AppError::NotFound(format!("{} not found", R::KIND))
}

/// is_visible_to
///
/// The visibility rule on its own, for a plain user id. Ownerless and public records are
/// visible to everyone; everything else only to its owner.
pub fn is_visible_to<R: Guarded>(viewer: Uuid, resource: &R) -> bool {
    let Some(owner) = resource.owner() else {
        return true;
    };
    match resource.visibility() {
        Some(Visibility::Public) => true,
        Some(Visibility::Private) | None => owner == viewer,
    }
}

/// can_read
///
/// [`is_visible_to`] for the caller. Records without a visibility flag are additionally
/// readable by administrators; private exercises are not.
pub fn can_read<R: Guarded>(user: &AuthUser, resource: &R) -> bool {
    is_visible_to(user.id, resource) || (resource.visibility().is_none() && user.is_admin())
}

/// can_modify
///
/// Owner or administrator, regardless of visibility. Ownerless records match no owner, so
/// only administrators may change them.
pub fn can_modify<R: Guarded>(user: &AuthUser, resource: &R) -> bool {
    user.is_admin() || resource.owner() == Some(user.id)
}

/// authorize
///
/// Decides whether `user` may perform `action` on an already-fetched `resource`.
pub fn authorize<R: Guarded>(user: &AuthUser, action: Action, resource: &R) -> Result<(), AppError> {
    match action {
        Action::Read if can_read(user, resource) => Ok(()),
        Action::Read => {
            tracing::debug!(user_id = %user.id, kind = R::KIND, "read hidden by visibility policy");
            Err(not_found::<R>())
        }
        Action::Update | Action::Delete if can_modify(user, resource) => Ok(()),
        Action::Update | Action::Delete => {
            tracing::info!(
                user_id = %user.id,
                kind = R::KIND,
                action = ?action,
                "ownership check denied request"
            );
            let verb = if action == Action::Update { "update" } else { "delete" };
            Err(AppError::Forbidden(format!(
                "Not authorized to {verb} this {}",
                R::KIND.to_lowercase()
            )))
        }
    }
}

/// authorize_found
///
/// Applies [`authorize`] to the result of a lookup by id, turning a miss into `NotFound`.
pub fn authorize_found<R: Guarded>(
    user: &AuthUser,
    action: Action,
    resource: Option<R>,
) -> Result<R, AppError> {
    let resource = resource.ok_or_else(not_found::<R>)?;
    authorize(user, action, &resource)?;
    Ok(resource)
}
