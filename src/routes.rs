use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    admin::Moderation,
    catalog::Catalog,
    error::{AppError, Result},
    extract::{AppJson, AppPath, AppQuery, Caller},
    lifecycle::LifecycleManager,
    models::*,
    store::SharedStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub catalog: Catalog,
    pub lifecycle: LifecycleManager,
    pub moderation: Moderation,
}

impl AppState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            catalog: Catalog::new(store.clone()),
            lifecycle: LifecycleManager::new(store.clone()),
            moderation: Moderation::new(store.clone()),
            store,
        }
    }
}

pub fn router(store: SharedStore) -> Router {
    Router::new()
        // catalog
        .route("/api/users/courses", get(list_courses).post(create_course))
        .route(
            "/api/users/courses/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/api/users/courses/:id/sections", post(add_section))
        .route(
            "/api/users/courses/:id/sections/:section_id",
            put(update_section).delete(delete_section),
        )
        .route("/api/users/courses/:id/payments", get(course_payments))
        .route("/api/users/my-courses", get(teacher_courses))
        .route("/api/users/profile", get(profile).put(update_profile))
        // enrollment lifecycle
        .route("/api/users/enroll/:course_id", post(enroll))
        .route("/api/users/enrolled", get(my_enrollments))
        .route("/api/users/enrolled/:enrollment_id", get(get_enrollment))
        .route("/api/users/progress/:enrollment_id", put(update_progress))
        .route("/api/users/certificate/:enrollment_id", get(certificate))
        .route("/api/users/payments", get(my_payments))
        // moderation
        .route("/api/admin/users", get(admin_users))
        .route(
            "/api/admin/users/:id",
            get(admin_get_user).put(admin_update_user).delete(admin_delete_user),
        )
        .route("/api/admin/users/:id/active", put(admin_set_active))
        .route("/api/admin/courses", get(admin_courses))
        .route("/api/admin/courses/:id", axum::routing::delete(admin_delete_course))
        .route("/api/admin/courses/:id/toggle-publish", put(admin_toggle_publish))
        .route("/api/admin/enrollments", get(admin_enrollments))
        .with_state(AppState::new(store))
}

// --- catalog ---

async fn list_courses(
    State(st): State<AppState>,
    AppQuery(q): AppQuery<CourseQuery>,
) -> Result<Json<Vec<Course>>> {
    Ok(Json(st.catalog.list_public(q).await?))
}

async fn get_course(State(st): State<AppState>, AppPath(id): AppPath<Uuid>) -> Result<Json<Course>> {
    Ok(Json(st.catalog.get(id).await?))
}

async fn create_course(
    State(st): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<NewCourse>,
) -> Result<impl IntoResponse> {
    let teacher = caller.teacher()?;
    let course = st.catalog.create(&teacher, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<CoursePatch>,
) -> Result<Json<Course>> {
    let teacher = caller.teacher()?;
    Ok(Json(st.catalog.update(id, &teacher, patch).await?))
}

async fn delete_course(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppQuery(q): AppQuery<DeleteQuery>,
) -> Result<Json<serde_json::Value>> {
    let teacher = caller.teacher()?;
    let outcome = st.lifecycle.delete_course(id, &teacher, q.force).await?;
    Ok(Json(json!({ "message": outcome.message(), "outcome": outcome.kind() })))
}

async fn add_section(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppJson(section): AppJson<NewSection>,
) -> Result<impl IntoResponse> {
    let teacher = caller.teacher()?;
    let course = st.catalog.add_section(id, &teacher, section).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_section(
    State(st): State<AppState>,
    caller: Caller,
    AppPath((id, section_id)): AppPath<(Uuid, Uuid)>,
    AppJson(patch): AppJson<SectionPatch>,
) -> Result<Json<Course>> {
    let teacher = caller.teacher()?;
    Ok(Json(st.catalog.update_section(id, section_id, &teacher, patch).await?))
}

async fn delete_section(
    State(st): State<AppState>,
    caller: Caller,
    AppPath((id, section_id)): AppPath<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>> {
    let teacher = caller.teacher()?;
    let course = st.catalog.delete_section(id, section_id, &teacher).await?;
    Ok(Json(json!({ "message": "Section deleted successfully", "course": course })))
}

async fn teacher_courses(State(st): State<AppState>, caller: Caller) -> Result<Json<Vec<Course>>> {
    let teacher = caller.teacher()?;
    Ok(Json(st.catalog.teacher_courses(&teacher).await?))
}

async fn course_payments(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<PaymentRecord>>> {
    let teacher = caller.teacher()?;
    Ok(Json(st.lifecycle.course_payments(id, &teacher).await?))
}

async fn profile(caller: Caller) -> Json<User> {
    Json(caller.0)
}

async fn update_profile(
    State(st): State<AppState>,
    caller: Caller,
    AppJson(update): AppJson<ProfileUpdate>,
) -> Result<Json<User>> {
    Ok(Json(st.moderation.update_profile(&caller.0, update).await?))
}

// --- enrollment lifecycle ---

async fn enroll(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(course_id): AppPath<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let student = caller.student()?;
    // free courses may be enrolled with an empty body
    let req: EnrollRequest = if body.iter().all(u8::is_ascii_whitespace) {
        EnrollRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::invalid(format!("invalid body: {e}")))?
    };
    let enrollment = st.lifecycle.enroll(&student, course_id, req).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn my_enrollments(State(st): State<AppState>, caller: Caller) -> Result<Json<Vec<EnrollmentView>>> {
    let student = caller.student()?;
    Ok(Json(st.lifecycle.student_enrollments(&student).await?))
}

async fn get_enrollment(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(enrollment_id): AppPath<Uuid>,
) -> Result<Json<EnrollmentView>> {
    let student = caller.student()?;
    Ok(Json(st.lifecycle.get_enrollment(enrollment_id, &student).await?))
}

async fn update_progress(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(enrollment_id): AppPath<Uuid>,
    AppJson(update): AppJson<ProgressUpdate>,
) -> Result<Json<EnrollmentView>> {
    let student = caller.student()?;
    Ok(Json(st.lifecycle.update_progress(enrollment_id, &student, update).await?))
}

async fn certificate(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(enrollment_id): AppPath<Uuid>,
) -> Result<Json<Certificate>> {
    let student = caller.student()?;
    Ok(Json(st.lifecycle.certificate(enrollment_id, &student).await?))
}

async fn my_payments(State(st): State<AppState>, caller: Caller) -> Result<Json<Vec<PaymentRecord>>> {
    let student = caller.student()?;
    Ok(Json(st.lifecycle.student_payments(&student).await?))
}

// --- moderation ---

async fn admin_users(
    State(st): State<AppState>,
    caller: Caller,
    AppQuery(q): AppQuery<UserQuery>,
) -> Result<Json<Vec<User>>> {
    caller.admin()?;
    Ok(Json(st.moderation.list_users(q).await?))
}

async fn admin_get_user(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<User>> {
    caller.admin()?;
    Ok(Json(st.moderation.get_user(id).await?))
}

async fn admin_update_user(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<UserPatch>,
) -> Result<Json<User>> {
    let admin = caller.admin()?;
    Ok(Json(st.moderation.update_user(&admin, id, patch).await?))
}

async fn admin_delete_user(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let admin = caller.admin()?;
    let outcome = st.moderation.delete_user(&admin, id).await?;
    let message = if outcome.removed {
        "User deleted successfully"
    } else {
        "User owns courses with issued certificates and was deactivated"
    };
    Ok(Json(json!({ "message": message, "outcome": outcome })))
}

async fn admin_set_active(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UserActivation>,
) -> Result<Json<User>> {
    let admin = caller.admin()?;
    Ok(Json(st.moderation.set_active(&admin, id, body.is_active).await?))
}

async fn admin_courses(
    State(st): State<AppState>,
    caller: Caller,
    AppQuery(q): AppQuery<CourseQuery>,
) -> Result<Json<Vec<Course>>> {
    caller.admin()?;
    Ok(Json(st.catalog.all_courses(q).await?))
}

async fn admin_delete_course(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
    AppQuery(q): AppQuery<DeleteQuery>,
) -> Result<Json<serde_json::Value>> {
    let admin = caller.admin()?;
    let outcome = st.lifecycle.delete_course(id, &admin, q.force).await?;
    Ok(Json(json!({ "message": outcome.message(), "outcome": outcome.kind() })))
}

async fn admin_toggle_publish(
    State(st): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<serde_json::Value>> {
    caller.admin()?;
    let course = st.catalog.toggle_publish(id).await?;
    let published = course.is_published();
    Ok(Json(json!({
        "message": if published { "Course published successfully" } else { "Course unpublished successfully" },
        "isPublished": published,
    })))
}

async fn admin_enrollments(
    State(st): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<EnrollmentView>>> {
    caller.admin()?;
    Ok(Json(st.lifecycle.all_enrollments().await?))
}
