use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate record: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The decision `CourseStore::remove_course` took and what it removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Counts read inside the deleting write.
    pub counts: EnrollmentCounts,
    pub plan: DeletionPlan,
    /// Enrollments deleted: in-progress ones on archive, all on purge.
    pub removed: u64,
}

#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn insert_course(&self, course: &Course) -> StoreResult<()>;
    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>>;
    /// Persists metadata, sections and lifecycle. The `enrolled` counter is
    /// owned by `record_enrollment` and is never overwritten here.
    async fn save_course(&self, course: &Course) -> StoreResult<()>;
    async fn list_courses(&self, filter: &CourseFilter) -> StoreResult<Vec<Course>>;
    /// Decides and applies a deletion in one write: counts the course's
    /// enrollments, runs `DeletionPlan::decide` on them, then archives or
    /// purges. Nothing changes when the plan is `Blocked`. Returns `None`
    /// when the course does not exist.
    async fn remove_course(&self, id: Uuid, force: bool, at: DateTime<Utc>) -> StoreResult<Option<Removal>>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Writes the payment (if any), the enrollment and the course's
    /// `enrolled` increment as one unit. A second enrollment for the same
    /// (student, course) pair, a reused transaction id, or a course that is
    /// gone or archived is a `StoreError::Conflict` and leaves nothing behind.
    async fn record_enrollment(
        &self,
        enrollment: &Enrollment,
        payment: Option<&PaymentRecord>,
    ) -> StoreResult<()>;
    async fn get_enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>>;
    async fn find_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>>;
    /// Loads, mutates and writes back one enrollment with no other write to
    /// it in between. Returns the stored result, or `None` when it does not
    /// exist.
    async fn modify_enrollment(
        &self,
        id: Uuid,
        apply: &mut (dyn for<'en> FnMut(&'en mut Enrollment) + Send),
    ) -> StoreResult<Option<Enrollment>>;
    async fn enrollments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>>;
    /// Every enrollment, newest first.
    async fn all_enrollments(&self) -> StoreResult<Vec<Enrollment>>;
    async fn count_enrollments(&self, course_id: Uuid) -> StoreResult<EnrollmentCounts>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn payments_for_course(&self, course_id: Uuid) -> StoreResult<Vec<PaymentRecord>>;
    async fn payments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Resolves a bearer token issued by the auth service.
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
    /// Writes name, email, role and active flag. A taken email is a
    /// `StoreError::Conflict`. Returns false when the user does not exist.
    async fn update_user(&self, user: &User) -> StoreResult<bool>;
    /// Removes the user with their sessions, enrollments and payments. Fails
    /// with `StoreError::Conflict` while the user still owns courses.
    /// Returns the number of enrollments removed, or `None` when the user
    /// does not exist.
    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<u64>>;
}

pub trait Store: CourseStore + EnrollmentStore + PaymentStore + UserStore {}

impl<T> Store for T where T: CourseStore + EnrollmentStore + PaymentStore + UserStore {}

pub type SharedStore = Arc<dyn Store>;
