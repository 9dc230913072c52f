use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::store::{CourseStore, SharedStore, UserStore};

/// Account management: admin moderation plus the caller's own profile.
#[derive(Clone)]
pub struct Moderation {
    store: SharedStore,
}

impl Moderation {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn list_users(&self, q: UserQuery) -> Result<Vec<User>> {
        let filter = UserFilter {
            role: q.role,
            search: q.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        };
        Ok(self.store.list_users(&filter).await?)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))
    }

    #[tracing::instrument(skip(self, admin, patch), fields(admin = %admin.id))]
    pub async fn update_user(&self, admin: &User, user_id: Uuid, mut patch: UserPatch) -> Result<User> {
        patch.normalise();
        patch.validate()?;
        if admin.id == user_id {
            if patch.is_active == Some(false) {
                return Err(AppError::invalid("admins cannot deactivate themselves"));
            }
            if patch.role.is_some_and(|r| r != Role::Admin) {
                return Err(AppError::invalid("admins cannot change their own role"));
            }
        }
        let user = self.write(user_id, patch).await?;
        tracing::info!(user = %user.id, role = user.role.as_str(), active = user.is_active, "user updated");
        Ok(user)
    }

    pub async fn set_active(&self, admin: &User, user_id: Uuid, active: bool) -> Result<User> {
        let patch = UserPatch {
            is_active: Some(active),
            ..Default::default()
        };
        self.update_user(admin, user_id, patch).await
    }

    /// Name and email edits by the account holder.
    pub async fn update_profile(&self, user: &User, update: ProfileUpdate) -> Result<User> {
        let mut patch = UserPatch::from(update);
        patch.normalise();
        patch.validate()?;
        self.write(user.id, patch).await
    }

    /// Removes an account and what it owns. Owned courses go through the
    /// forced deletion policy: courses with completions are archived, and
    /// an account left owning archives is deactivated instead of removed.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin.id))]
    pub async fn delete_user(&self, admin: &User, user_id: Uuid) -> Result<AccountRemoval> {
        if admin.id == user_id {
            return Err(AppError::invalid("admins cannot delete themselves"));
        }
        let mut user = self.get_user(user_id).await?;

        let owned = CourseFilter {
            owner_id: Some(user_id),
            include_unpublished: true,
            include_archived: true,
            ..Default::default()
        };
        let mut outcome = AccountRemoval::default();
        for course in self.store.list_courses(&owned).await? {
            let Some(removal) = self.store.remove_course(course.id, true, Utc::now()).await? else {
                continue;
            };
            outcome.enrollments_removed += removal.removed;
            match removal.plan {
                DeletionPlan::Archive => outcome.courses_archived += 1,
                DeletionPlan::Purge => outcome.courses_deleted += 1,
                DeletionPlan::Blocked => {}
            }
        }

        if outcome.courses_archived > 0 {
            user.is_active = false;
            self.store.update_user(&user).await?;
            tracing::warn!(
                user = %user_id,
                archived = outcome.courses_archived,
                "user owns archived courses with certificates, deactivated instead"
            );
            return Ok(outcome);
        }

        outcome.enrollments_removed += self
            .store
            .delete_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        outcome.removed = true;
        tracing::info!(user = %user_id, courses = outcome.courses_deleted, "user deleted");
        Ok(outcome)
    }

    async fn write(&self, user_id: Uuid, patch: UserPatch) -> Result<User> {
        let mut user = self.get_user(user_id).await?;
        patch.apply(&mut user);
        if !self.store.update_user(&user).await? {
            return Err(AppError::not_found("user not found"));
        }
        Ok(user)
    }
}
