mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use learnhub::error::AppError;
use learnhub::lifecycle::{DeletionOutcome, LifecycleManager};
use learnhub::memory::InMemoryStore;
use learnhub::models::*;
use learnhub::store::*;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[tokio::test]
async fn course_without_enrollments_is_deleted() {
    let w = world().await;
    let course = w.course(dec!(0), 2).await;

    let outcome = w.lifecycle.delete_course(course.id, &w.teacher, false).await.unwrap();
    assert_eq!(outcome, DeletionOutcome::Deleted { removed_enrollments: 0 });
    assert_eq!(outcome.message(), "Course deleted successfully");
    assert!(w.store.get_course(course.id).await.unwrap().is_none());
}

#[tokio::test]
async fn enrolled_course_is_blocked_without_force() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    w.complete(&w.student, &course).await;
    w.enroll_free(&w.other_student, &course).await;

    let err = w.lifecycle.delete_course(course.id, &w.teacher, false).await.unwrap_err();
    match err {
        AppError::DeletionBlocked(counts) => {
            assert_eq!(counts.enrolled, 2);
            assert_eq!(counts.completed, 1);
            assert_eq!(counts.in_progress(), 1);
        }
        other => panic!("expected DeletionBlocked, got {other:?}"),
    }

    let after = w.store.get_course(course.id).await.unwrap().unwrap();
    assert!(after.is_published());
    assert_eq!(w.store.count_enrollments(course.id).await.unwrap().enrolled, 2);
}

#[tokio::test]
async fn forced_delete_without_completions_cascades() {
    let w = world().await;
    let course = w.course(dec!(20), 2).await;
    for (student, txn) in [(&w.student, "TXN-A"), (&w.other_student, "TXN-B")] {
        w.lifecycle
            .enroll(
                student,
                course.id,
                EnrollRequest {
                    payment_method: Some("UPI".into()),
                    transaction_id: Some(txn.into()),
                },
            )
            .await
            .unwrap();
    }
    assert_eq!(w.store.payments_for_course(course.id).await.unwrap().len(), 2);

    let outcome = w.lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();
    assert_eq!(outcome, DeletionOutcome::Deleted { removed_enrollments: 2 });
    assert!(w.store.get_course(course.id).await.unwrap().is_none());
    assert!(w.store.payments_for_course(course.id).await.unwrap().is_empty());
    assert!(w.store.find_enrollment(w.student.id, course.id).await.unwrap().is_none());
}

#[tokio::test]
async fn forced_delete_with_completions_archives() {
    let w = world().await;
    let course = w.course(dec!(0), 2).await;
    let done = w.complete(&w.student, &course).await;
    let pending = w.enroll_free(&w.other_student, &course).await;

    let outcome = w.lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();
    assert_eq!(
        outcome,
        DeletionOutcome::Archived {
            removed_in_progress: 1,
            retained_completed: 1,
        }
    );

    let archived = w.store.get_course(course.id).await.unwrap().unwrap();
    assert!(archived.is_archived());
    assert!(!archived.is_published());
    assert!(w.store.get_enrollment(pending.id).await.unwrap().is_none());
    assert!(w.store.get_enrollment(done.id).await.unwrap().is_some());

    // hidden from the catalog and the teacher's list, but certificates resolve
    assert!(w.catalog.list_public(CourseQuery::default()).await.unwrap().is_empty());
    assert!(w.catalog.teacher_courses(&w.teacher).await.unwrap().is_empty());
    assert_eq!(w.catalog.all_courses(CourseQuery::default()).await.unwrap().len(), 1);
    let cert = w.lifecycle.certificate(done.id, &w.student).await.unwrap();
    assert_eq!(cert.course_name, "Practical Rust Services");
}

#[tokio::test]
async fn completed_course_is_never_physically_removed() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    w.complete(&w.student, &course).await;

    assert!(w.lifecycle.delete_course(course.id, &w.teacher, false).await.is_err());
    w.lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();
    // a second forced delete of the archive keeps it
    let outcome = w.lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();
    assert!(matches!(outcome, DeletionOutcome::Archived { removed_in_progress: 0, .. }));
    assert!(w.store.get_course(course.id).await.unwrap().is_some());
}

#[tokio::test]
async fn only_owner_or_admin_may_delete() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;

    let err = w
        .lifecycle
        .delete_course(course.id, &w.other_teacher, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let outcome = w.lifecycle.delete_course(course.id, &w.admin, false).await.unwrap();
    assert_eq!(outcome.kind(), "deleted");
}

#[tokio::test]
async fn archived_course_rejects_edits() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    w.complete(&w.student, &course).await;
    w.lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();

    let err = w
        .catalog
        .update(
            course.id,
            &w.teacher,
            CoursePatch {
                published: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(matches!(
        w.catalog.toggle_publish(course.id).await.unwrap_err(),
        AppError::Conflict(_)
    ));
}

/// Delegates to an in-memory store, completing one enrollment the first time
/// a course is read: a student finishes while a deletion is under way.
struct CompletesOnRead {
    inner: InMemoryStore,
    pending: Mutex<Option<Uuid>>,
}

#[async_trait]
impl CourseStore for CompletesOnRead {
    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        self.inner.insert_course(course).await
    }
    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let course = self.inner.get_course(id).await?;
        let pending = self.pending.lock().unwrap().take();
        if let Some(enrollment) = pending {
            self.inner
                .modify_enrollment(enrollment, &mut |e: &mut Enrollment| {
                    e.is_completed = true;
                    e.completion_percentage = 100;
                })
                .await?;
        }
        Ok(course)
    }
    async fn save_course(&self, course: &Course) -> StoreResult<()> {
        self.inner.save_course(course).await
    }
    async fn list_courses(&self, filter: &CourseFilter) -> StoreResult<Vec<Course>> {
        self.inner.list_courses(filter).await
    }
    async fn remove_course(&self, id: Uuid, force: bool, at: DateTime<Utc>) -> StoreResult<Option<Removal>> {
        self.inner.remove_course(id, force, at).await
    }
}

#[async_trait]
impl EnrollmentStore for CompletesOnRead {
    async fn record_enrollment(&self, e: &Enrollment, p: Option<&PaymentRecord>) -> StoreResult<()> {
        self.inner.record_enrollment(e, p).await
    }
    async fn get_enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>> {
        self.inner.get_enrollment(id).await
    }
    async fn find_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>> {
        self.inner.find_enrollment(student_id, course_id).await
    }
    async fn modify_enrollment(
        &self,
        id: Uuid,
        apply: &mut (dyn for<'en> FnMut(&'en mut Enrollment) + Send),
    ) -> StoreResult<Option<Enrollment>> {
        self.inner.modify_enrollment(id, apply).await
    }
    async fn enrollments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        self.inner.enrollments_for_student(student_id).await
    }
    async fn all_enrollments(&self) -> StoreResult<Vec<Enrollment>> {
        self.inner.all_enrollments().await
    }
    async fn count_enrollments(&self, course_id: Uuid) -> StoreResult<EnrollmentCounts> {
        self.inner.count_enrollments(course_id).await
    }
}

#[async_trait]
impl PaymentStore for CompletesOnRead {
    async fn payments_for_course(&self, course_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.payments_for_course(course_id).await
    }
    async fn payments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.payments_for_student(student_id).await
    }
}

#[async_trait]
impl UserStore for CompletesOnRead {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<User>> {
        self.inner.user_for_token(token).await
    }
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        self.inner.list_users(filter).await
    }
    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        self.inner.update_user(user).await
    }
    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<u64>> {
        self.inner.delete_user(id).await
    }
}

#[tokio::test]
async fn completion_during_forced_delete_still_archives() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    let e = w.enroll_free(&w.student, &course).await;

    let racing = CompletesOnRead {
        inner: w.store.clone(),
        pending: Mutex::new(Some(e.id)),
    };
    let lifecycle = LifecycleManager::new(Arc::new(racing));
    let outcome = lifecycle.delete_course(course.id, &w.teacher, true).await.unwrap();

    assert_eq!(
        outcome,
        DeletionOutcome::Archived {
            removed_in_progress: 0,
            retained_completed: 1,
        }
    );
    assert!(w.store.get_course(course.id).await.unwrap().unwrap().is_archived());
    assert!(w.store.get_enrollment(e.id).await.unwrap().unwrap().is_completed);
}

#[tokio::test]
async fn deleting_a_teacher_purges_courses_without_completions() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    w.enroll_free(&w.student, &course).await;

    let outcome = w.moderation.delete_user(&w.admin, w.teacher.id).await.unwrap();
    assert_eq!(
        outcome,
        AccountRemoval {
            removed: true,
            courses_deleted: 1,
            courses_archived: 0,
            enrollments_removed: 1,
        }
    );
    assert!(w.store.get_course(course.id).await.unwrap().is_none());
    assert!(w.store.get_user(w.teacher.id).await.unwrap().is_none());
    assert!(w.store.user_for_token(TEACHER_TOKEN).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_teacher_keeps_certificates() {
    let w = world().await;
    let course = w.course(dec!(0), 1).await;
    let done = w.complete(&w.student, &course).await;
    w.enroll_free(&w.other_student, &course).await;

    let outcome = w.moderation.delete_user(&w.admin, w.teacher.id).await.unwrap();
    assert!(!outcome.removed);
    assert_eq!(outcome.courses_archived, 1);
    assert_eq!(outcome.enrollments_removed, 1);

    let teacher = w.store.get_user(w.teacher.id).await.unwrap().unwrap();
    assert!(!teacher.is_active);
    assert!(w.store.get_course(course.id).await.unwrap().unwrap().is_archived());
    let cert = w.lifecycle.certificate(done.id, &w.student).await.unwrap();
    assert_eq!(cert.course_name, "Practical Rust Services");
}

#[tokio::test]
async fn deleting_a_student_drops_their_enrollments_and_payments() {
    let w = world().await;
    let course = w.course(dec!(12), 1).await;
    let req = EnrollRequest {
        payment_method: Some("Net Banking".into()),
        transaction_id: Some("TXN-NB-7".into()),
    };
    let e = w.lifecycle.enroll(&w.student, course.id, req).await.unwrap();

    let outcome = w.moderation.delete_user(&w.admin, w.student.id).await.unwrap();
    assert!(outcome.removed);
    assert_eq!(outcome.enrollments_removed, 1);
    assert!(w.store.get_enrollment(e.id).await.unwrap().is_none());
    assert!(w.store.payments_for_course(course.id).await.unwrap().is_empty());
    assert!(w.store.get_course(course.id).await.unwrap().is_some());
}
