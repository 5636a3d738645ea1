use futures::future::try_join_all;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::PanelContext;
use crate::backend::{self, Backend, Query};
use crate::error::{Error, ValidationError};
use crate::models::{tables, Course, CourseLevel, NewCourse, Profile};
use crate::notify::Notifier;

/// One of the instructor's courses with its enrollment count
#[derive(Debug, Clone, PartialEq)]
pub struct InstructorCourse {
    pub course: Course,
    pub student_count: u64,
}

impl InstructorCourse {
    pub fn revenue(&self) -> f64 {
        self.course.price * self.student_count as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructorTotals {
    pub courses: usize,
    pub students: u64,
    pub revenue: f64,
    /// Mean of the ratings present on the course rows
    pub average_rating: Option<f64>,
}

/// Raw course form input
#[derive(Debug, Clone, Default)]
pub struct CourseDraft {
    pub title: String,
    pub description: String,
    pub price: String,
    pub duration: String,
    pub level: CourseLevel,
}

impl CourseDraft {
    /// Check required fields and the price, producing the insert payload
    pub fn validate(&self, instructor_id: &str) -> Result<NewCourse, ValidationError> {
        let required = [
            ("Title", &self.title),
            ("Description", &self.description),
            ("Price", &self.price),
            ("Duration", &self.duration),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ValidationError::Required(*field));
        }

        let price: f64 = self
            .price
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidPrice)?;
        if !price.is_finite() || price < 0.0 {
            return Err(ValidationError::InvalidPrice);
        }

        Ok(NewCourse {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            instructor_id: instructor_id.to_string(),
            price,
            duration: self.duration.trim().to_string(),
            level: self.level,
        })
    }
}

/// Courses taught by the signed-in instructor
pub struct InstructorPanel {
    ctx: PanelContext,
    profile: Profile,
    courses: Vec<InstructorCourse>,
}

impl InstructorPanel {
    pub fn new(
        backend: Arc<dyn Backend>,
        profile: Profile,
        notifier: Notifier,
        scope: CancellationToken,
    ) -> Self {
        Self {
            ctx: PanelContext::new(backend, notifier, scope),
            profile,
            courses: Vec::new(),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Fetch own courses, newest first, then every enrollment count
    /// concurrently.
    pub async fn load(&mut self) -> Result<(), Error> {
        let backend = self.ctx.backend();
        let query = Query::table(tables::COURSES)
            .eq("instructor_id", &self.profile.id)
            .order("created_at", false);

        let fetched = self
            .ctx
            .scoped(async {
                let courses = backend::fetch::<Course>(backend, &query).await?;
                let counts = try_join_all(courses.iter().map(|course| {
                    let query = Query::table(tables::ENROLLMENTS).eq("course_id", &course.id);
                    async move { backend.count(&query).await }
                }))
                .await?;

                Ok::<_, Error>(courses
                    .into_iter()
                    .zip(counts)
                    .map(|(course, student_count)| InstructorCourse {
                        course,
                        student_count,
                    })
                    .collect::<Vec<_>>())
            })
            .await;

        match fetched {
            Ok(courses) => {
                info!(
                    "instructor panel loaded {} courses for {}",
                    courses.len(),
                    self.profile.id
                );
                self.courses = courses;
                Ok(())
            }
            Err(e) => {
                self.ctx.fetch_failed("instructor", &e);
                Err(e)
            }
        }
    }

    pub fn courses(&self) -> &[InstructorCourse] {
        &self.courses
    }

    pub fn totals(&self) -> InstructorTotals {
        let ratings: Vec<f64> = self
            .courses
            .iter()
            .filter_map(|c| c.course.rating)
            .collect();
        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };

        InstructorTotals {
            courses: self.courses.len(),
            students: self.courses.iter().map(|c| c.student_count).sum(),
            revenue: self.courses.iter().map(InstructorCourse::revenue).sum(),
            average_rating,
        }
    }

    /// Validate and insert a course, then reload. Validation failures return
    /// before any backend call.
    pub async fn create_course(&mut self, draft: &CourseDraft) -> Result<Course, Error> {
        let new_course = draft.validate(&self.profile.id)?;
        let backend = self.ctx.backend();

        let created = self
            .ctx
            .scoped(backend::insert_row::<NewCourse, Course>(
                backend,
                tables::COURSES,
                &new_course,
            ))
            .await;

        let course = match created {
            Ok(course) => course,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                error!("course creation failed: {}", e);
                self.ctx
                    .notifier()
                    .error(format!("Error creating course: {}", e.user_message()));
                return Err(e);
            }
        };

        self.ctx.notifier().success("Course created successfully!");
        // A failed reload has already been reported; the course exists.
        let _ = self.load().await;
        Ok(course)
    }

    pub fn close(&self) {
        self.ctx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }
}
