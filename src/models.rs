use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

// --- identity ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "Teacher" => Ok(Role::Teacher),
            "Student" => Ok(Role::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

/// The public part of a user, as embedded in course and enrollment views.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
        }
    }
}

// --- catalog ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Category {
    WebDevelopment,
    MobileDevelopment,
    DataScience,
    MachineLearning,
    CloudComputing,
    DevOps,
    Cybersecurity,
    UiUxDesign,
    DigitalMarketing,
    Business,
    Other,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::WebDevelopment,
        Category::MobileDevelopment,
        Category::DataScience,
        Category::MachineLearning,
        Category::CloudComputing,
        Category::DevOps,
        Category::Cybersecurity,
        Category::UiUxDesign,
        Category::DigitalMarketing,
        Category::Business,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::WebDevelopment => "Web Development",
            Category::MobileDevelopment => "Mobile Development",
            Category::DataScience => "Data Science",
            Category::MachineLearning => "Machine Learning",
            Category::CloudComputing => "Cloud Computing",
            Category::DevOps => "DevOps",
            Category::Cybersecurity => "Cybersecurity",
            Category::UiUxDesign => "UI/UX Design",
            Category::DigitalMarketing => "Digital Marketing",
            Category::Business => "Business",
            Category::Other => "Other",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("invalid category: {s}"))
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Category> for &'static str {
    fn from(c: Category) -> Self {
        c.as_str()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub media_url: String,
    pub duration_minutes: i32,
    pub order: i32,
}

/// Where a course sits in its lifecycle. A physically deleted course has no
/// state at all; it simply stops existing in the store.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CourseLifecycle {
    Active { published: bool },
    /// Retained for certificate holders; hidden from the catalog and never
    /// physically removed.
    Archived { archived_at: DateTime<Utc> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub educator: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub price: Decimal,
    pub sections: Vec<Section>,
    pub enrolled: i64,
    pub lifecycle: CourseLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn new(owner: &User, req: NewCourse, now: DateTime<Utc>) -> Self {
        let mut indexed: Vec<(usize, NewSection)> = req.sections.into_iter().enumerate().collect();
        // caller-supplied order wins, otherwise keep submission order
        indexed.sort_by_key(|(i, s)| (s.order.unwrap_or(*i as i32 + 1), *i));
        let mut course = Self {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            educator: owner.name.clone(),
            title: req.title.trim().to_string(),
            description: req.description.trim().to_string(),
            category: req.category,
            price: req.price,
            sections: indexed.into_iter().map(|(_, s)| s.into_section(0)).collect(),
            enrolled: 0,
            lifecycle: CourseLifecycle::Active { published: true },
            created_at: now,
            updated_at: now,
        };
        course.renumber_sections();
        course
    }

    pub fn owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn is_archived(&self) -> bool {
        matches!(self.lifecycle, CourseLifecycle::Archived { .. })
    }

    pub fn is_published(&self) -> bool {
        matches!(self.lifecycle, CourseLifecycle::Active { published: true })
    }

    pub fn is_paid(&self) -> bool {
        self.price > Decimal::ZERO
    }

    pub fn section(&self, id: Uuid) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Restores the dense 1..N `order` sequence.
    pub fn renumber_sections(&mut self) {
        for (i, s) in self.sections.iter_mut().enumerate() {
            s.order = i as i32 + 1;
        }
    }

    pub fn add_section(&mut self, new: NewSection) -> Uuid {
        let section = new.into_section(self.sections.len() as i32 + 1);
        let id = section.id;
        self.sections.push(section);
        id
    }

    pub fn update_section(&mut self, id: Uuid, patch: SectionPatch) -> bool {
        let Some(section) = self.sections.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if let Some(title) = patch.title.filter(|t| !t.trim().is_empty()) {
            section.title = title;
        }
        if let Some(description) = patch.description {
            section.description = description;
        }
        if let Some(media_url) = patch.media_url {
            section.media_url = media_url;
        }
        if let Some(duration) = patch.duration_minutes {
            section.duration_minutes = duration.max(0);
        }
        true
    }

    /// Removes a section and renumbers the rest. Progress entries pointing at
    /// the removed id are left alone in the enrollment store.
    pub fn remove_section(&mut self, id: Uuid) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| s.id != id);
        if self.sections.len() == before {
            return false;
        }
        self.renumber_sections();
        true
    }

    /// Marks the course archived. An archived course keeps its original
    /// `archived_at`.
    pub fn archive(&mut self, now: DateTime<Utc>) {
        if self.is_archived() {
            return;
        }
        self.lifecycle = CourseLifecycle::Archived { archived_at: now };
        self.updated_at = now;
    }
}

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    #[validate(length(min = 1, message = "section title is required"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media_url: String,
    #[serde(default)]
    pub duration_minutes: i32,
    pub order: Option<i32>,
}

impl NewSection {
    fn into_section(self, order: i32) -> Section {
        Section {
            id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            description: self.description,
            media_url: self.media_url,
            duration_minutes: self.duration_minutes.max(0),
            order,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SectionPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub media_url: Option<String>,
    pub duration_minutes: Option<i32>,
}

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    #[validate(length(min = 5, max = 200, message = "title must be between 5 and 200 characters"))]
    pub title: String,
    #[validate(length(min = 20, message = "description must be at least 20 characters"))]
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    #[validate(nested)]
    pub sections: Vec<NewSection>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    #[validate(length(min = 5, max = 200, message = "title must be between 5 and 200 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 20, message = "description must be at least 20 characters"))]
    pub description: Option<String>,
    pub category: Option<Category>,
    pub price: Option<Decimal>,
    pub published: Option<bool>,
}

impl CoursePatch {
    /// Trims text fields so length rules apply to what gets stored.
    pub fn normalise(&mut self) {
        for field in [&mut self.title, &mut self.description] {
            if let Some(v) = field.as_mut() {
                *v = v.trim().to_string();
            }
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CourseSort {
    #[default]
    Newest,
    Popular,
    PriceLow,
    PriceHigh,
}

/// Query-string shape of the public catalog listing.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CourseQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: Option<CourseSort>,
}

#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub owner_id: Option<Uuid>,
    pub category: Option<Category>,
    pub search: Option<String>,
    pub include_unpublished: bool,
    pub include_archived: bool,
    pub sort: CourseSort,
}

impl CourseFilter {
    pub fn matches(&self, c: &Course) -> bool {
        if self.owner_id.is_some_and(|o| o != c.owner_id) {
            return false;
        }
        if self.category.is_some_and(|cat| cat != c.category) {
            return false;
        }
        if !self.include_archived && c.is_archived() {
            return false;
        }
        if !self.include_unpublished && !c.is_archived() && !c.is_published() {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(needle) => {
                c.title.to_lowercase().contains(&needle)
                    || c.description.to_lowercase().contains(&needle)
                    || c.educator.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }

    pub fn sort(&self, courses: &mut [Course]) {
        match self.sort {
            CourseSort::Newest => courses.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            CourseSort::Popular => courses.sort_by(|a, b| b.enrolled.cmp(&a.enrolled)),
            CourseSort::PriceLow => courses.sort_by(|a, b| a.price.cmp(&b.price)),
            CourseSort::PriceHigh => courses.sort_by(|a, b| b.price.cmp(&a.price)),
        }
    }
}

// --- enrollment ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    pub section_id: Uuid,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub progress: Vec<SectionProgress>,
    pub completion_percentage: u8,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_issued: bool,
    pub certificate_url: Option<String>,
    pub last_accessed_section: i32,
}

impl Enrollment {
    /// Seeds one incomplete progress entry per section currently on the course.
    pub fn new(student_id: Uuid, course: &Course, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            course_id: course.id,
            enrolled_at: now,
            progress: course
                .sections
                .iter()
                .map(|s| SectionProgress {
                    section_id: s.id,
                    completed: false,
                    completed_at: None,
                })
                .collect(),
            completion_percentage: 0,
            is_completed: false,
            completed_at: None,
            certificate_issued: false,
            certificate_url: None,
            last_accessed_section: 0,
        }
    }
}

/// Raw enroll body. Payment fields are only inspected for paid courses, so a
/// free course accepts anything (or nothing) here.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub section_id: Option<Uuid>,
    pub completed: Option<bool>,
    pub last_accessed_section: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrollmentCounts {
    pub enrolled: u64,
    pub completed: u64,
}

impl EnrollmentCounts {
    pub fn in_progress(&self) -> u64 {
        self.enrolled - self.completed
    }
}

/// What a course deletion is allowed to do, given its enrollments.
///
/// `Purge` is only ever produced when no enrollment has completed, so a
/// course that issued a certificate can never be physically removed. Stores
/// decide against counts read inside the same write that acts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPlan {
    /// Enrollments exist and the caller did not force.
    Blocked,
    Archive,
    Purge,
}

impl DeletionPlan {
    pub fn decide(counts: EnrollmentCounts, force: bool) -> Self {
        if counts.enrolled > 0 && !force {
            DeletionPlan::Blocked
        } else if counts.completed > 0 {
            DeletionPlan::Archive
        } else {
            DeletionPlan::Purge
        }
    }
}

/// An enrollment with its course and teacher resolved for display.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub course: Option<Course>,
    pub teacher: Option<UserSummary>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub student_name: String,
    pub course_name: String,
    pub completed_date: Option<DateTime<Utc>>,
    pub certificate_id: Uuid,
}

// --- payments ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String", into = "&'static str")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    PayPal,
    Upi,
    NetBanking,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::CreditCard,
        PaymentMethod::DebitCard,
        PaymentMethod::PayPal,
        PaymentMethod::Upi,
        PaymentMethod::NetBanking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "Credit Card",
            PaymentMethod::DebitCard => "Debit Card",
            PaymentMethod::PayPal => "PayPal",
            PaymentMethod::Upi => "UPI",
            PaymentMethod::NetBanking => "Net Banking",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unsupported payment method: {s}"))
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PaymentMethod> for &'static str {
    fn from(m: PaymentMethod) -> Self {
        m.as_str()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            "Refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserActivation {
    pub is_active: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Case-insensitive substring of name or email.
    pub search: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, u: &User) -> bool {
        if self.role.is_some_and(|r| r != u.role) {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(needle) => u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle),
            None => true,
        }
    }
}

/// Admin edit of another account.
#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[validate(length(min = 1, max = 100, message = "name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "email is not valid"))]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Self-service edit of the caller's own name and email.
#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "email is not valid"))]
    pub email: Option<String>,
}

impl From<ProfileUpdate> for UserPatch {
    fn from(p: ProfileUpdate) -> Self {
        UserPatch {
            name: p.name,
            email: p.email,
            ..Default::default()
        }
    }
}

impl UserPatch {
    /// Trims text fields; blank ones count as absent.
    pub fn normalise(&mut self) {
        for field in [&mut self.name, &mut self.email] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
    }

    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(email) = self.email {
            user.email = email.to_lowercase();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
    }
}

/// What removing an account did to the data it owned.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountRemoval {
    /// False when the account still owns archived courses with certificates
    /// and was deactivated instead.
    pub removed: bool,
    pub courses_deleted: u64,
    pub courses_archived: u64,
    pub enrollments_removed: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}
