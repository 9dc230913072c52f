//! Enrollment lifecycle: enroll, progress, completion, certificates, and the
//! retention policy applied when a course is deleted.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::progress;
use crate::store::{CourseStore, EnrollmentStore, PaymentStore, SharedStore, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    Archived { removed_in_progress: u64, retained_completed: u64 },
    Deleted { removed_enrollments: u64 },
}

impl DeletionOutcome {
    pub fn message(&self) -> String {
        match *self {
            DeletionOutcome::Archived {
                removed_in_progress,
                retained_completed,
            } => format!(
                "Course archived. {removed_in_progress} in-progress enrollment(s) removed. \
                 {retained_completed} completed student(s) retain their certificates."
            ),
            DeletionOutcome::Deleted {
                removed_enrollments: 0,
            } => "Course deleted successfully".to_string(),
            DeletionOutcome::Deleted { removed_enrollments } => {
                format!("Course and {removed_enrollments} enrollment(s) deleted successfully")
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeletionOutcome::Archived { .. } => "archived",
            DeletionOutcome::Deleted { .. } => "deleted",
        }
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: SharedStore,
}

impl LifecycleManager {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, student, req), fields(student = %student.id))]
    pub async fn enroll(&self, student: &User, course_id: Uuid, req: EnrollRequest) -> Result<Enrollment> {
        let course = self
            .store
            .get_course(course_id)
            .await?
            .filter(|c| !c.is_archived())
            .ok_or_else(|| AppError::not_found("course not found"))?;

        if self.store.find_enrollment(student.id, course_id).await?.is_some() {
            return Err(AppError::Conflict("already enrolled in this course".into()));
        }

        let now = Utc::now();
        let payment = if course.is_paid() {
            let (Some(method), Some(txn)) = (
                req.payment_method.filter(|m| !m.trim().is_empty()),
                req.transaction_id.filter(|t| !t.trim().is_empty()),
            ) else {
                return Err(AppError::invalid("payment information required"));
            };
            Some(PaymentRecord {
                id: Uuid::new_v4(),
                student_id: student.id,
                course_id,
                amount: course.price,
                method: method.parse().map_err(AppError::InvalidInput)?,
                transaction_id: txn,
                status: PaymentStatus::Completed,
                paid_at: now,
            })
        } else {
            None
        };

        let enrollment = Enrollment::new(student.id, &course, now);
        self.store.record_enrollment(&enrollment, payment.as_ref()).await?;
        tracing::info!(
            enrollment = %enrollment.id,
            paid = payment.is_some(),
            sections = enrollment.progress.len(),
            "enrollment created"
        );
        Ok(enrollment)
    }

    #[tracing::instrument(skip(self, requester, update), fields(requester = %requester.id))]
    pub async fn update_progress(
        &self,
        enrollment_id: Uuid,
        requester: &User,
        update: ProgressUpdate,
    ) -> Result<EnrollmentView> {
        let enrollment = self.owned_enrollment(enrollment_id, requester).await?;
        let course = self.store.get_course(enrollment.course_id).await?;
        let sections = course.as_ref().map(|c| c.sections.as_slice());
        let now = Utc::now();

        let mut completed_now = false;
        let mut apply = |e: &mut Enrollment| {
            if let Some(section_id) = update.section_id {
                progress::apply_section(&mut e.progress, section_id, update.completed, now);
            }
            if let Some(cursor) = update.last_accessed_section {
                e.last_accessed_section = cursor;
            }
            completed_now = progress::settle(e, sections, now);
        };
        let enrollment = self
            .store
            .modify_enrollment(enrollment_id, &mut apply)
            .await?
            .ok_or_else(|| AppError::not_found("enrollment not found"))?;
        if completed_now {
            tracing::info!(enrollment = %enrollment.id, "course completed, certificate issued");
        }

        self.view(enrollment, course).await
    }

    pub async fn get_enrollment(&self, enrollment_id: Uuid, requester: &User) -> Result<EnrollmentView> {
        let enrollment = self.owned_enrollment(enrollment_id, requester).await?;
        let course = self.store.get_course(enrollment.course_id).await?;
        self.view(enrollment, course).await
    }

    pub async fn student_enrollments(&self, student: &User) -> Result<Vec<EnrollmentView>> {
        let enrollments = self.store.enrollments_for_student(student.id).await?;
        self.views(enrollments).await
    }

    pub async fn all_enrollments(&self) -> Result<Vec<EnrollmentView>> {
        let enrollments = self.store.all_enrollments().await?;
        self.views(enrollments).await
    }

    pub async fn certificate(&self, enrollment_id: Uuid, requester: &User) -> Result<Certificate> {
        let enrollment = self.owned_enrollment(enrollment_id, requester).await?;
        if !enrollment.is_completed {
            return Err(AppError::invalid("course not completed yet"));
        }
        let course = self
            .store
            .get_course(enrollment.course_id)
            .await?
            .ok_or_else(|| AppError::not_found("course not found"))?;
        Ok(Certificate {
            student_name: requester.name.clone(),
            course_name: course.title,
            completed_date: enrollment.completed_at,
            certificate_id: enrollment.id,
        })
    }

    /// Deletes or archives a course. Owners and admins may delete.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn delete_course(&self, course_id: Uuid, requester: &User, force: bool) -> Result<DeletionOutcome> {
        let course = self
            .store
            .get_course(course_id)
            .await?
            .ok_or_else(|| AppError::not_found("course not found"))?;
        if !course.owned_by(requester.id) && requester.role != Role::Admin {
            return Err(AppError::forbidden("not authorized to delete this course"));
        }

        let removal = self
            .store
            .remove_course(course_id, force, Utc::now())
            .await?
            .ok_or_else(|| AppError::not_found("course not found"))?;
        let outcome = match removal.plan {
            DeletionPlan::Blocked => {
                tracing::warn!(
                    enrolled = removal.counts.enrolled,
                    completed = removal.counts.completed,
                    "course deletion blocked pending force"
                );
                return Err(AppError::DeletionBlocked(removal.counts));
            }
            DeletionPlan::Archive => DeletionOutcome::Archived {
                removed_in_progress: removal.removed,
                retained_completed: removal.counts.completed,
            },
            DeletionPlan::Purge => DeletionOutcome::Deleted {
                removed_enrollments: removal.removed,
            },
        };
        tracing::info!(course = %course_id, outcome = outcome.kind(), "course removed");
        Ok(outcome)
    }

    /// The caller's payment history, newest first.
    pub async fn student_payments(&self, student: &User) -> Result<Vec<PaymentRecord>> {
        Ok(self.store.payments_for_student(student.id).await?)
    }

    /// Payments taken for a course. Owners and admins may look.
    pub async fn course_payments(&self, course_id: Uuid, requester: &User) -> Result<Vec<PaymentRecord>> {
        let course = self
            .store
            .get_course(course_id)
            .await?
            .ok_or_else(|| AppError::not_found("course not found"))?;
        if !course.owned_by(requester.id) && requester.role != Role::Admin {
            return Err(AppError::forbidden("not authorized to view payments for this course"));
        }
        Ok(self.store.payments_for_course(course_id).await?)
    }

    async fn owned_enrollment(&self, id: Uuid, requester: &User) -> Result<Enrollment> {
        let enrollment = self
            .store
            .get_enrollment(id)
            .await?
            .ok_or_else(|| AppError::not_found("enrollment not found"))?;
        if enrollment.student_id != requester.id {
            return Err(AppError::forbidden("not authorized to access this enrollment"));
        }
        Ok(enrollment)
    }

    async fn view(&self, enrollment: Enrollment, course: Option<Course>) -> Result<EnrollmentView> {
        let teacher = match &course {
            Some(c) => self.store.get_user(c.owner_id).await?.as_ref().map(UserSummary::from),
            None => None,
        };
        Ok(EnrollmentView {
            enrollment,
            course,
            teacher,
        })
    }

    async fn views(&self, enrollments: Vec<Enrollment>) -> Result<Vec<EnrollmentView>> {
        let mut out = Vec::with_capacity(enrollments.len());
        for e in enrollments {
            let course = self.store.get_course(e.course_id).await?;
            out.push(self.view(e, course).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_messages() {
        assert_eq!(
            DeletionOutcome::Deleted { removed_enrollments: 0 }.message(),
            "Course deleted successfully"
        );
        assert_eq!(
            DeletionOutcome::Deleted { removed_enrollments: 2 }.message(),
            "Course and 2 enrollment(s) deleted successfully"
        );
        assert!(DeletionOutcome::Archived {
            removed_in_progress: 1,
            retained_completed: 4,
        }
        .message()
        .contains("4 completed student(s) retain their certificates"));
    }
}
