use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, types::Json, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::*;
use crate::store::*;

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max_connections: u32) -> Result<Db> {
    Ok(PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?)
}

/// PostgreSQL-backed store. Sections and per-section progress live in JSONB
/// columns next to their parent row, mirroring the document shape.
#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        // crate-relative path for sqlx migrations
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// Unique and foreign-key violations are caller-visible conflicts; anything
// else stays a database error.
fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let what = match db.constraint() {
                Some("enrollments_student_course_key") => "already enrolled in this course".to_string(),
                Some("payments_transaction_key") => "transaction id already recorded".to_string(),
                Some("users_email_key") => "email already in use".to_string(),
                Some(other) => format!("duplicate value violates {other}"),
                None => "duplicate value".to_string(),
            };
            return StoreError::Conflict(what);
        }
        if db.is_foreign_key_violation() {
            return StoreError::Conflict("referenced record no longer exists".into());
        }
    }
    StoreError::Database(e)
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    owner_id: Uuid,
    educator: String,
    title: String,
    description: String,
    category: String,
    price: Decimal,
    sections: Json<Vec<Section>>,
    enrolled: i64,
    is_published: bool,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourseRow> for Course {
    type Error = StoreError;

    fn try_from(r: CourseRow) -> Result<Self, Self::Error> {
        let lifecycle = if r.is_deleted {
            CourseLifecycle::Archived {
                archived_at: r.deleted_at.unwrap_or(r.updated_at),
            }
        } else {
            CourseLifecycle::Active {
                published: r.is_published,
            }
        };
        Ok(Course {
            id: r.id,
            owner_id: r.owner_id,
            educator: r.educator,
            title: r.title,
            description: r.description,
            category: r.category.parse().map_err(StoreError::Corrupt)?,
            price: r.price,
            sections: r.sections.0,
            enrolled: r.enrolled,
            lifecycle,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// (is_published, is_deleted, deleted_at)
fn lifecycle_columns(l: CourseLifecycle) -> (bool, bool, Option<DateTime<Utc>>) {
    match l {
        CourseLifecycle::Active { published } => (published, false, None),
        CourseLifecycle::Archived { archived_at } => (false, true, Some(archived_at)),
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: Uuid,
    student_id: Uuid,
    course_id: Uuid,
    enrolled_at: DateTime<Utc>,
    progress: Json<Vec<SectionProgress>>,
    completion_percentage: i16,
    is_completed: bool,
    completed_at: Option<DateTime<Utc>>,
    certificate_issued: bool,
    certificate_url: Option<String>,
    last_accessed_section: i32,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = StoreError;

    fn try_from(r: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            id: r.id,
            student_id: r.student_id,
            course_id: r.course_id,
            enrolled_at: r.enrolled_at,
            progress: r.progress.0,
            completion_percentage: u8::try_from(r.completion_percentage)
                .map_err(|_| StoreError::Corrupt(format!("percentage {}", r.completion_percentage)))?,
            is_completed: r.is_completed,
            completed_at: r.completed_at,
            certificate_issued: r.certificate_issued,
            certificate_url: r.certificate_url,
            last_accessed_section: r.last_accessed_section,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    student_id: Uuid,
    course_id: Uuid,
    amount: Decimal,
    method: String,
    transaction_id: String,
    status: String,
    paid_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: r.id,
            student_id: r.student_id,
            course_id: r.course_id,
            amount: r.amount,
            method: r.method.parse().map_err(StoreError::Corrupt)?,
            transaction_id: r.transaction_id,
            status: r.status.parse().map_err(StoreError::Corrupt)?,
            paid_at: r.paid_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    is_active: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            name: r.name,
            email: r.email,
            role: r.role.parse().map_err(StoreError::Corrupt)?,
            is_active: r.is_active,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, enrolled_at, progress, completion_percentage, \
     is_completed, completed_at, certificate_issued, certificate_url, last_accessed_section";

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl CourseStore for PgStore {
    async fn insert_course(&self, c: &Course) -> StoreResult<()> {
        let (published, deleted, deleted_at) = lifecycle_columns(c.lifecycle);
        sqlx::query(
            r#"
            INSERT INTO courses (id, owner_id, educator, title, description, category, price,
                                 sections, enrolled, is_published, is_deleted, deleted_at,
                                 created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(c.id)
        .bind(c.owner_id)
        .bind(&c.educator)
        .bind(&c.title)
        .bind(&c.description)
        .bind(c.category.as_str())
        .bind(c.price)
        .bind(Json(&c.sections))
        .bind(c.enrolled)
        .bind(published)
        .bind(deleted)
        .bind(deleted_at)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        sqlx::query_as::<_, CourseRow>("SELECT * FROM courses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Course::try_from)
            .transpose()
    }

    async fn save_course(&self, c: &Course) -> StoreResult<()> {
        let (published, deleted, deleted_at) = lifecycle_columns(c.lifecycle);
        sqlx::query(
            r#"
            UPDATE courses
            SET title=$2, description=$3, category=$4, price=$5, sections=$6,
                is_published=$7, is_deleted=$8, deleted_at=$9, updated_at=$10
            WHERE id=$1
            "#,
        )
        .bind(c.id)
        .bind(&c.title)
        .bind(&c.description)
        .bind(c.category.as_str())
        .bind(c.price)
        .bind(Json(&c.sections))
        .bind(published)
        .bind(deleted)
        .bind(deleted_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_courses(&self, filter: &CourseFilter) -> StoreResult<Vec<Course>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM courses WHERE TRUE");
        if let Some(owner) = filter.owner_id {
            qb.push(" AND owner_id = ").push_bind(owner);
        }
        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if !filter.include_archived {
            qb.push(" AND NOT is_deleted");
        }
        if !filter.include_unpublished {
            qb.push(" AND (is_published OR is_deleted)");
        }
        if let Some(search) = filter.search.as_deref() {
            let pattern = like_pattern(search);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(match filter.sort {
            CourseSort::Newest => " ORDER BY created_at DESC",
            CourseSort::Popular => " ORDER BY enrolled DESC",
            CourseSort::PriceLow => " ORDER BY price ASC",
            CourseSort::PriceHigh => " ORDER BY price DESC",
        });
        let rows = qb.build_query_as::<CourseRow>().fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn remove_course(&self, id: Uuid, force: bool, at: DateTime<Utc>) -> StoreResult<Option<Removal>> {
        let mut tx = self.pool.begin().await?;
        // The course row lock holds off new enrollments, the enrollment row
        // locks hold off progress writes, until the decision commits.
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM courses WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(None);
        }
        let completed: Vec<bool> =
            sqlx::query_scalar("SELECT is_completed FROM enrollments WHERE course_id = $1 FOR UPDATE")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let counts = EnrollmentCounts {
            enrolled: completed.len() as u64,
            completed: completed.iter().filter(|done| **done).count() as u64,
        };

        let plan = DeletionPlan::decide(counts, force);
        let removed = match plan {
            DeletionPlan::Blocked => 0,
            DeletionPlan::Archive => {
                let removed = sqlx::query("DELETE FROM enrollments WHERE course_id = $1 AND NOT is_completed")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                sqlx::query(
                    r#"
                    UPDATE courses
                    SET is_published = FALSE, is_deleted = TRUE,
                        deleted_at = COALESCE(deleted_at, $2),
                        updated_at = CASE WHEN is_deleted THEN updated_at ELSE $2 END
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
                removed
            }
            DeletionPlan::Purge => {
                let removed = sqlx::query("DELETE FROM enrollments WHERE course_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                sqlx::query("DELETE FROM payments WHERE course_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM courses WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                removed
            }
        };
        tx.commit().await?;
        Ok(Some(Removal { counts, plan, removed }))
    }
}

#[async_trait]
impl EnrollmentStore for PgStore {
    async fn record_enrollment(
        &self,
        e: &Enrollment,
        payment: Option<&PaymentRecord>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        // shares the lock `remove_course` takes exclusively
        let archived: Option<bool> = sqlx::query_scalar("SELECT is_deleted FROM courses WHERE id = $1 FOR SHARE")
            .bind(e.course_id)
            .fetch_optional(&mut *tx)
            .await?;
        match archived {
            None => return Err(StoreError::Conflict(format!("course {} no longer exists", e.course_id))),
            Some(true) => return Err(StoreError::Conflict("course is archived".into())),
            Some(false) => {}
        }
        if let Some(p) = payment {
            sqlx::query(
                r#"
                INSERT INTO payments (id, student_id, course_id, amount, method, transaction_id, status, paid_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                "#,
            )
            .bind(p.id)
            .bind(p.student_id)
            .bind(p.course_id)
            .bind(p.amount)
            .bind(p.method.as_str())
            .bind(&p.transaction_id)
            .bind(p.status.as_str())
            .bind(p.paid_at)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }
        sqlx::query(
            r#"
            INSERT INTO enrollments (id, student_id, course_id, enrolled_at, progress,
                                     completion_percentage, is_completed, completed_at,
                                     certificate_issued, certificate_url, last_accessed_section)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(e.id)
        .bind(e.student_id)
        .bind(e.course_id)
        .bind(e.enrolled_at)
        .bind(Json(&e.progress))
        .bind(i16::from(e.completion_percentage))
        .bind(e.is_completed)
        .bind(e.completed_at)
        .bind(e.certificate_issued)
        .bind(&e.certificate_url)
        .bind(e.last_accessed_section)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
        sqlx::query("UPDATE courses SET enrolled = enrolled + 1 WHERE id = $1")
            .bind(e.course_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn find_enrollment(&self, student_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 AND course_id = $2"
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn modify_enrollment(
        &self,
        id: Uuid,
        apply: &mut (dyn for<'en> FnMut(&'en mut Enrollment) + Send),
    ) -> StoreResult<Option<Enrollment>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut e = Enrollment::try_from(row)?;
        apply(&mut e);
        sqlx::query(
            r#"
            UPDATE enrollments
            SET progress=$2, completion_percentage=$3, is_completed=$4, completed_at=$5,
                certificate_issued=$6, certificate_url=$7, last_accessed_section=$8
            WHERE id=$1
            "#,
        )
        .bind(e.id)
        .bind(Json(&e.progress))
        .bind(i16::from(e.completion_percentage))
        .bind(e.is_completed)
        .bind(e.completed_at)
        .bind(e.certificate_issued)
        .bind(&e.certificate_url)
        .bind(e.last_accessed_section)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(e))
    }

    async fn enrollments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 ORDER BY enrolled_at DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn all_enrollments(&self) -> StoreResult<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments ORDER BY enrolled_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn count_enrollments(&self, course_id: Uuid) -> StoreResult<EnrollmentCounts> {
        let (enrolled, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_completed) FROM enrollments WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(EnrollmentCounts {
            enrolled: enrolled as u64,
            completed: completed as u64,
        })
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn payments_for_course(&self, course_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE course_id = $1 ORDER BY paid_at DESC",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn payments_for_student(&self, student_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE student_id = $1 ORDER BY paid_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT id, name, email, role, is_active FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn user_for_token(&self, token: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.name, u.email, u.role, u.is_active
            FROM sessions s JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND (s.expires_at IS NULL OR s.expires_at > now())
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, role, is_active FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2)
            ORDER BY name
            "#,
        )
        .bind(filter.role.map(Role::as_str))
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_user(&self, u: &User) -> StoreResult<bool> {
        let updated = sqlx::query("UPDATE users SET name = $2, email = $3, role = $4, is_active = $5 WHERE id = $1")
            .bind(u.id)
            .bind(&u.name)
            .bind(&u.email)
            .bind(u.role.as_str())
            .bind(u.is_active)
            .execute(&self.pool)
            .await
            .map_err(classify)?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<u64>> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(None);
        }
        let owns_courses: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM courses WHERE owner_id = $1)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if owns_courses {
            return Err(StoreError::Conflict("user still owns courses".into()));
        }
        let removed = sqlx::query("DELETE FROM enrollments WHERE student_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM payments WHERE student_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        // sessions go with the user row
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await?;
        Ok(Some(removed))
    }
}
