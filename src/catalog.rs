//! Teacher-owned course catalog: listing, authoring and section edits.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::store::{CourseStore, SharedStore};

#[derive(Clone)]
pub struct Catalog {
    store: SharedStore,
}

impl Catalog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Published, non-archived courses.
    pub async fn list_public(&self, q: CourseQuery) -> Result<Vec<Course>> {
        let filter = query_filter(q)?;
        Ok(self.store.list_courses(&filter).await?)
    }

    /// Any stored course, archived ones included.
    pub async fn get(&self, id: Uuid) -> Result<Course> {
        self.store
            .get_course(id)
            .await?
            .ok_or_else(|| AppError::not_found("course not found"))
    }

    pub async fn teacher_courses(&self, teacher: &User) -> Result<Vec<Course>> {
        let filter = CourseFilter {
            owner_id: Some(teacher.id),
            include_unpublished: true,
            ..Default::default()
        };
        Ok(self.store.list_courses(&filter).await?)
    }

    /// Every course, unpublished and archived included.
    pub async fn all_courses(&self, q: CourseQuery) -> Result<Vec<Course>> {
        let filter = CourseFilter {
            include_unpublished: true,
            include_archived: true,
            ..query_filter(q)?
        };
        Ok(self.store.list_courses(&filter).await?)
    }

    #[tracing::instrument(skip(self, teacher, req), fields(teacher = %teacher.id))]
    pub async fn create(&self, teacher: &User, mut req: NewCourse) -> Result<Course> {
        req.title = req.title.trim().to_string();
        req.description = req.description.trim().to_string();
        req.validate()?;
        check_price(req.price)?;

        let course = Course::new(teacher, req, Utc::now());
        self.store.insert_course(&course).await?;
        tracing::info!(course = %course.id, sections = course.sections.len(), "course created");
        Ok(course)
    }

    pub async fn update(&self, id: Uuid, requester: &User, mut patch: CoursePatch) -> Result<Course> {
        patch.normalise();
        patch.validate()?;
        let mut course = self.owned_course(id, requester).await?;
        if let Some(title) = patch.title {
            course.title = title;
        }
        if let Some(description) = patch.description {
            course.description = description;
        }
        if let Some(category) = patch.category {
            course.category = category;
        }
        if let Some(price) = patch.price {
            check_price(price)?;
            course.price = price;
        }
        if let Some(published) = patch.published {
            course.lifecycle = CourseLifecycle::Active { published };
        }
        self.persist(course).await
    }

    pub async fn add_section(&self, id: Uuid, requester: &User, section: NewSection) -> Result<Course> {
        section.validate()?;
        let mut course = self.owned_course(id, requester).await?;
        course.add_section(section);
        self.persist(course).await
    }

    pub async fn update_section(
        &self,
        id: Uuid,
        section_id: Uuid,
        requester: &User,
        patch: SectionPatch,
    ) -> Result<Course> {
        let mut course = self.owned_course(id, requester).await?;
        if !course.update_section(section_id, patch) {
            return Err(AppError::not_found("section not found"));
        }
        self.persist(course).await
    }

    /// Existing enrollments keep their progress entry for the removed section.
    pub async fn delete_section(&self, id: Uuid, section_id: Uuid, requester: &User) -> Result<Course> {
        let mut course = self.owned_course(id, requester).await?;
        if !course.remove_section(section_id) {
            return Err(AppError::not_found("section not found"));
        }
        self.persist(course).await
    }

    pub async fn toggle_publish(&self, id: Uuid) -> Result<Course> {
        let mut course = self.get(id).await?;
        match course.lifecycle {
            CourseLifecycle::Active { published } => {
                course.lifecycle = CourseLifecycle::Active { published: !published };
            }
            CourseLifecycle::Archived { .. } => {
                return Err(AppError::Conflict("course is archived".into()));
            }
        }
        self.persist(course).await
    }

    async fn owned_course(&self, id: Uuid, requester: &User) -> Result<Course> {
        let course = self.get(id).await?;
        if !course.owned_by(requester.id) {
            return Err(AppError::forbidden("not authorized to modify this course"));
        }
        if course.is_archived() {
            return Err(AppError::Conflict("course is archived".into()));
        }
        Ok(course)
    }

    async fn persist(&self, mut course: Course) -> Result<Course> {
        course.updated_at = Utc::now();
        self.store.save_course(&course).await?;
        // re-read so the enrolled counter reflects the store
        self.get(course.id).await
    }
}

fn query_filter(q: CourseQuery) -> Result<CourseFilter> {
    let category = match q.category.as_deref().map(str::trim) {
        None | Some("") | Some("All") => None,
        Some(name) => Some(name.parse::<Category>().map_err(AppError::InvalidInput)?),
    };
    Ok(CourseFilter {
        category,
        search: q.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        sort: q.sort.unwrap_or_default(),
        ..Default::default()
    })
}

fn check_price(price: Decimal) -> Result<()> {
    if price < Decimal::ZERO {
        return Err(AppError::invalid("price must be a positive number"));
    }
    Ok(())
}
