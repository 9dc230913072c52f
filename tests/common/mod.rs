#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use learnhub::{
    admin::Moderation,
    catalog::Catalog,
    lifecycle::LifecycleManager,
    memory::InMemoryStore,
    models::*,
    store::SharedStore,
};

pub const TEACHER_TOKEN: &str = "teacher-token";
pub const OTHER_TEACHER_TOKEN: &str = "other-teacher-token";
pub const STUDENT_TOKEN: &str = "student-token";
pub const OTHER_STUDENT_TOKEN: &str = "other-student-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub struct World {
    pub store: InMemoryStore,
    pub shared: SharedStore,
    pub catalog: Catalog,
    pub lifecycle: LifecycleManager,
    pub moderation: Moderation,
    pub teacher: User,
    pub other_teacher: User,
    pub student: User,
    pub other_student: User,
    pub admin: User,
}

fn user(name: &str, role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.into(),
        email: format!("{}@learnhub.test", name.to_lowercase().replace(' ', ".")),
        role,
        is_active: true,
    }
}

pub async fn world() -> World {
    let store = InMemoryStore::new();
    let teacher = user("Tess Teacher", Role::Teacher);
    let other_teacher = user("Omar Teacher", Role::Teacher);
    let student = user("Sam Student", Role::Student);
    let other_student = user("Sia Student", Role::Student);
    let admin = user("Ada Admin", Role::Admin);
    for (u, token) in [
        (&teacher, TEACHER_TOKEN),
        (&other_teacher, OTHER_TEACHER_TOKEN),
        (&student, STUDENT_TOKEN),
        (&other_student, OTHER_STUDENT_TOKEN),
        (&admin, ADMIN_TOKEN),
    ] {
        store.insert_user(u.clone()).await;
        store.issue_token(token, u.id).await;
    }
    let shared: SharedStore = Arc::new(store.clone());
    World {
        catalog: Catalog::new(shared.clone()),
        lifecycle: LifecycleManager::new(shared.clone()),
        moderation: Moderation::new(shared.clone()),
        shared,
        store,
        teacher,
        other_teacher,
        student,
        other_student,
        admin,
    }
}

pub fn course_req(title: &str, price: Decimal, sections: usize) -> NewCourse {
    NewCourse {
        title: title.into(),
        description: "A hands-on course with plenty of exercises.".into(),
        category: Category::WebDevelopment,
        price,
        sections: (1..=sections)
            .map(|i| NewSection {
                title: format!("Section {i}"),
                description: String::new(),
                media_url: format!("/media/{i}.mp4"),
                duration_minutes: 10,
                order: None,
            })
            .collect(),
    }
}

impl World {
    pub async fn course(&self, price: Decimal, sections: usize) -> Course {
        self.catalog
            .create(&self.teacher, course_req("Practical Rust Services", price, sections))
            .await
            .unwrap()
    }

    pub async fn enroll_free(&self, student: &User, course: &Course) -> Enrollment {
        self.lifecycle
            .enroll(student, course.id, EnrollRequest::default())
            .await
            .unwrap()
    }

    pub async fn mark(&self, student: &User, enrollment: Uuid, section: Uuid, completed: bool) -> EnrollmentView {
        self.lifecycle
            .update_progress(
                enrollment,
                student,
                ProgressUpdate {
                    section_id: Some(section),
                    completed: Some(completed),
                    last_accessed_section: None,
                },
            )
            .await
            .unwrap()
    }

    /// Enrolls `student` and completes every section.
    pub async fn complete(&self, student: &User, course: &Course) -> Enrollment {
        let e = self.enroll_free(student, course).await;
        let mut last = None;
        for s in &course.sections {
            last = Some(self.mark(student, e.id, s.id, true).await);
        }
        last.map(|v| v.enrollment).unwrap_or(e)
    }
}
