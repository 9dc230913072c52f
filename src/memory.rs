use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::*;
use crate::store::*;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Uuid>,
    courses: HashMap<Uuid, Course>,
    enrollments: HashMap<Uuid, Enrollment>,
    payments: HashMap<Uuid, PaymentRecord>,
}

impl State {
    fn counts(&self, course_id: Uuid) -> EnrollmentCounts {
        let mut counts = EnrollmentCounts::default();
        for e in self.enrollments.values().filter(|e| e.course_id == course_id) {
            counts.enrolled += 1;
            if e.is_completed {
                counts.completed += 1;
            }
        }
        counts
    }

    /// Newest first.
    fn payments_where(&self, keep: impl Fn(&PaymentRecord) -> bool) -> Vec<PaymentRecord> {
        let mut out: Vec<PaymentRecord> = self.payments.values().filter(|p| keep(*p)).cloned().collect();
        out.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        out
    }
}

/// A thread-safe in-memory implementation of every store trait.
///
/// All collections sit behind a single `RwLock`, so each multi-record write
/// (enroll, archive, purge) is applied under one write guard and is never
/// observed half done.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// Registers a bearer token for a user, standing in for the external
    /// auth service.
    pub async fn issue_token(&self, token: impl Into<String>, user_id: Uuid) {
        self.state.write().await.sessions.insert(token.into(), user_id);
    }
}

#[async_trait]
impl CourseStore for InMemoryStore {
    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        let mut st = self.state.write().await;
        if st.courses.contains_key(&course.id) {
            return Err(StoreError::Conflict(format!("course {} already exists", course.id)));
        }
        st.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        Ok(self.state.read().await.courses.get(&id).cloned())
    }

    async fn save_course(&self, course: &Course) -> StoreResult<()> {
        let mut st = self.state.write().await;
        if let Some(existing) = st.courses.get_mut(&course.id) {
            let enrolled = existing.enrolled;
            *existing = course.clone();
            existing.enrolled = enrolled;
        }
        Ok(())
    }

    async fn list_courses(&self, filter: &CourseFilter) -> StoreResult<Vec<Course>> {
        let st = self.state.read().await;
        let mut out: Vec<Course> = st.courses.values().filter(|c| filter.matches(c)).cloned().collect();
        filter.sort(&mut out);
        Ok(out)
    }

    async fn remove_course(&self, id: Uuid, force: bool, at: DateTime<Utc>) -> StoreResult<Option<Removal>> {
        let mut st = self.state.write().await;
        if !st.courses.contains_key(&id) {
            return Ok(None);
        }
        let counts = st.counts(id);
        let plan = DeletionPlan::decide(counts, force);
        let before = st.enrollments.len();
        match plan {
            DeletionPlan::Blocked => {}
            DeletionPlan::Archive => {
                st.enrollments.retain(|_, e| e.course_id != id || e.is_completed);
                if let Some(course) = st.courses.get_mut(&id) {
                    course.archive(at);
                }
            }
            DeletionPlan::Purge => {
                st.enrollments.retain(|_, e| e.course_id != id);
                st.payments.retain(|_, p| p.course_id != id);
                st.courses.remove(&id);
            }
        }
        Ok(Some(Removal {
            counts,
            plan,
            removed: (before - st.enrollments.len()) as u64,
        }))
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryStore {
    async fn record_enrollment(
        &self,
        enrollment: &Enrollment,
        payment: Option<&PaymentRecord>,
    ) -> StoreResult<()> {
        let mut st = self.state.write().await;
        match st.courses.get(&enrollment.course_id) {
            None => {
                return Err(StoreError::Conflict(format!(
                    "course {} no longer exists",
                    enrollment.course_id
                )))
            }
            Some(c) if c.is_archived() => {
                return Err(StoreError::Conflict("course is archived".into()));
            }
            Some(_) => {}
        }
        if st
            .enrollments
            .values()
            .any(|e| e.student_id == enrollment.student_id && e.course_id == enrollment.course_id)
        {
            return Err(StoreError::Conflict("already enrolled in this course".into()));
        }
        if let Some(p) = payment {
            if st.payments.values().any(|x| x.transaction_id == p.transaction_id) {
                return Err(StoreError::Conflict(format!(
                    "transaction {} already recorded",
                    p.transaction_id
                )));
            }
            st.payments.insert(p.id, p.clone());
        }
        st.enrollments.insert(enrollment.id, enrollment.clone());
        if let Some(course) = st.courses.get_mut(&enrollment.course_id) {
            course.enrolled += 1;
        }
        Ok(())
    }

    async fn get_enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>> {
        Ok(self.state.read().await.enrollments.get(&id).cloned())
    }

    async fn find_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let st = self.state.read().await;
        Ok(st
            .enrollments
            .values()
            .find(|e| e.student_id == student_id && e.course_id == course_id)
            .cloned())
    }

    async fn modify_enrollment(
        &self,
        id: Uuid,
        apply: &mut (dyn for<'en> FnMut(&'en mut Enrollment) + Send),
    ) -> StoreResult<Option<Enrollment>> {
        let mut st = self.state.write().await;
        Ok(st.enrollments.get_mut(&id).map(|e| {
            apply(e);
            e.clone()
        }))
    }

    async fn enrollments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let st = self.state.read().await;
        let mut out: Vec<Enrollment> = st
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(out)
    }

    async fn all_enrollments(&self) -> StoreResult<Vec<Enrollment>> {
        let st = self.state.read().await;
        let mut out: Vec<Enrollment> = st.enrollments.values().cloned().collect();
        out.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(out)
    }

    async fn count_enrollments(&self, course_id: Uuid) -> StoreResult<EnrollmentCounts> {
        Ok(self.state.read().await.counts(course_id))
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn payments_for_course(&self, course_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        Ok(self.state.read().await.payments_where(|p| p.course_id == course_id))
    }

    async fn payments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        Ok(self.state.read().await.payments_where(|p| p.student_id == student_id))
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn user_for_token(&self, token: &str) -> StoreResult<Option<User>> {
        let st = self.state.read().await;
        Ok(st.sessions.get(token).and_then(|id| st.users.get(id)).cloned())
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let st = self.state.read().await;
        let mut out: Vec<User> = st.users.values().filter(|u| filter.matches(u)).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let mut st = self.state.write().await;
        if st
            .users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::Conflict("email already in use".into()));
        }
        Ok(match st.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<u64>> {
        let mut st = self.state.write().await;
        if !st.users.contains_key(&id) {
            return Ok(None);
        }
        if st.courses.values().any(|c| c.owner_id == id) {
            return Err(StoreError::Conflict("user still owns courses".into()));
        }
        let before = st.enrollments.len();
        st.enrollments.retain(|_, e| e.student_id != id);
        let removed = (before - st.enrollments.len()) as u64;
        st.payments.retain(|_, p| p.student_id != id);
        st.sessions.retain(|_, user| *user != id);
        st.users.remove(&id);
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn course() -> Course {
        let owner = User {
            id: Uuid::new_v4(),
            name: "Grace".into(),
            email: "grace@example.com".into(),
            role: Role::Teacher,
            is_active: true,
        };
        Course::new(
            &owner,
            NewCourse {
                title: "Compilers in Practice".into(),
                description: "Parsing, lowering and code generation.".into(),
                category: Category::Other,
                price: dec!(10),
                sections: vec![],
            },
            Utc::now(),
        )
    }

    fn payment(course: &Course, student: Uuid, txn: &str) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            student_id: student,
            course_id: course.id,
            amount: course.price,
            method: PaymentMethod::Upi,
            transaction_id: txn.into(),
            status: PaymentStatus::Completed,
            paid_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_enrollment_leaves_no_payment_behind() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        let student = Uuid::new_v4();

        let first = Enrollment::new(student, &c, Utc::now());
        store
            .record_enrollment(&first, Some(&payment(&c, student, "TXN-1")))
            .await
            .unwrap();

        let second = Enrollment::new(student, &c, Utc::now());
        let err = store
            .record_enrollment(&second, Some(&payment(&c, student, "TXN-2")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.payments_for_course(c.id).await.unwrap().len(), 1);
        assert_eq!(store.get_course(c.id).await.unwrap().unwrap().enrolled, 1);
    }

    #[tokio::test]
    async fn reused_transaction_id_is_rejected() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .record_enrollment(&Enrollment::new(a, &c, Utc::now()), Some(&payment(&c, a, "SAME")))
            .await
            .unwrap();
        let err = store
            .record_enrollment(&Enrollment::new(b, &c, Utc::now()), Some(&payment(&c, b, "SAME")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_enrollment(b, c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_course_keeps_enrolled_counter() {
        let store = InMemoryStore::new();
        let mut c = course();
        store.insert_course(&c).await.unwrap();
        store
            .record_enrollment(&Enrollment::new(Uuid::new_v4(), &c, Utc::now()), None)
            .await
            .unwrap();

        c.title = "Compilers, Revisited".into();
        store.save_course(&c).await.unwrap();
        let saved = store.get_course(c.id).await.unwrap().unwrap();
        assert_eq!(saved.title, "Compilers, Revisited");
        assert_eq!(saved.enrolled, 1);
    }

    #[tokio::test]
    async fn tokens_resolve_to_users() {
        let store = InMemoryStore::new();
        let user = User {
            id: Uuid::new_v4(),
            name: "Lin".into(),
            email: "lin@example.com".into(),
            role: Role::Student,
            is_active: true,
        };
        store.insert_user(user.clone()).await;
        store.issue_token("tok", user.id).await;
        assert_eq!(store.user_for_token("tok").await.unwrap(), Some(user));
        assert_eq!(store.user_for_token("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn removal_decides_on_counts_taken_in_the_same_write() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        let e = Enrollment::new(Uuid::new_v4(), &c, Utc::now());
        store.record_enrollment(&e, None).await.unwrap();

        // a stale read says nothing has completed
        assert_eq!(store.count_enrollments(c.id).await.unwrap().completed, 0);
        store
            .modify_enrollment(e.id, &mut |e: &mut Enrollment| e.is_completed = true)
            .await
            .unwrap();

        let removal = store.remove_course(c.id, true, Utc::now()).await.unwrap().unwrap();
        assert_eq!(removal.plan, DeletionPlan::Archive);
        assert_eq!(removal.removed, 0);
        assert!(store.get_course(c.id).await.unwrap().unwrap().is_archived());
        assert!(store.get_enrollment(e.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn blocked_removal_changes_nothing() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        store
            .record_enrollment(&Enrollment::new(Uuid::new_v4(), &c, Utc::now()), None)
            .await
            .unwrap();
        let removal = store.remove_course(c.id, false, Utc::now()).await.unwrap().unwrap();
        assert_eq!(removal.plan, DeletionPlan::Blocked);
        assert_eq!(removal.counts.enrolled, 1);
        assert!(store.get_course(c.id).await.unwrap().is_some());
        assert!(store.remove_course(Uuid::new_v4(), true, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archived_course_takes_no_enrollments() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        let mut done = Enrollment::new(Uuid::new_v4(), &c, Utc::now());
        done.is_completed = true;
        store.record_enrollment(&done, None).await.unwrap();
        store.remove_course(c.id, true, Utc::now()).await.unwrap();

        let err = store
            .record_enrollment(&Enrollment::new(Uuid::new_v4(), &c, Utc::now()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn interleaved_modifications_both_land() {
        let store = InMemoryStore::new();
        let c = course();
        store.insert_course(&c).await.unwrap();
        let e = Enrollment::new(Uuid::new_v4(), &c, Utc::now());
        store.record_enrollment(&e, None).await.unwrap();

        let mut one = |e: &mut Enrollment| e.last_accessed_section += 1;
        let mut ten = |e: &mut Enrollment| e.last_accessed_section += 10;
        let (a, b) = tokio::join!(
            store.modify_enrollment(e.id, &mut one),
            store.modify_enrollment(e.id, &mut ten),
        );
        a.unwrap();
        b.unwrap();
        let stored = store.get_enrollment(e.id).await.unwrap().unwrap();
        assert_eq!(stored.last_accessed_section, 11);
    }

    #[tokio::test]
    async fn user_delete_requires_no_owned_courses() {
        let store = InMemoryStore::new();
        let c = course();
        let owner = User {
            id: c.owner_id,
            name: "Grace".into(),
            email: "grace@example.com".into(),
            role: Role::Teacher,
            is_active: true,
        };
        store.insert_user(owner.clone()).await;
        store.issue_token("grace", owner.id).await;
        store.insert_course(&c).await.unwrap();

        assert!(matches!(store.delete_user(owner.id).await, Err(StoreError::Conflict(_))));
        store.remove_course(c.id, true, Utc::now()).await.unwrap();
        assert_eq!(store.delete_user(owner.id).await.unwrap(), Some(0));
        assert!(store.user_for_token("grace").await.unwrap().is_none());
        assert_eq!(store.delete_user(owner.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_user_rejects_taken_email() {
        let store = InMemoryStore::new();
        let mk = |name: &str| User {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{name}@example.com"),
            role: Role::Student,
            is_active: true,
        };
        let (a, mut b) = (mk("ana"), mk("bo"));
        store.insert_user(a.clone()).await;
        store.insert_user(b.clone()).await;
        b.email = "ANA@example.com".into();
        assert!(matches!(store.update_user(&b).await, Err(StoreError::Conflict(_))));
        assert!(!store.update_user(&mk("ghost")).await.unwrap());
    }
}
