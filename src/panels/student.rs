use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::PanelContext;
use crate::backend::{self, Backend, Query};
use crate::error::Error;
use crate::models::{tables, Course, Enrollment, NewEnrollment, Profile};
use crate::notify::Notifier;

/// A course the student is enrolled in, with their progress
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledCourse {
    pub course: Course,
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StudentStats {
    pub enrolled: usize,
    pub completed: usize,
    pub in_progress: usize,
    /// Rounded mean progress, 0 with no enrollments
    pub overall_progress: u8,
}

#[derive(Default)]
struct StudentData {
    enrolled: Vec<EnrolledCourse>,
    available: Vec<Course>,
}

/// Enrollments of the signed-in student and the courses still open to them
pub struct StudentPanel {
    ctx: PanelContext,
    profile: Profile,
    data: StudentData,
}

impl StudentPanel {
    pub fn new(
        backend: Arc<dyn Backend>,
        profile: Profile,
        notifier: Notifier,
        scope: CancellationToken,
    ) -> Self {
        Self {
            ctx: PanelContext::new(backend, notifier, scope),
            profile,
            data: StudentData::default(),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub async fn load(&mut self) -> Result<(), Error> {
        let fetched = self
            .ctx
            .scoped(fetch_student_data(self.ctx.backend(), &self.profile.id))
            .await;

        match fetched {
            Ok(data) => {
                info!(
                    "student panel loaded {} enrolled, {} available for {}",
                    data.enrolled.len(),
                    data.available.len(),
                    self.profile.id
                );
                self.data = data;
                Ok(())
            }
            Err(e) => {
                self.ctx.fetch_failed("student", &e);
                Err(e)
            }
        }
    }

    pub fn enrolled(&self) -> &[EnrolledCourse] {
        &self.data.enrolled
    }

    /// All courses minus the enrolled ones
    pub fn available(&self) -> &[Course] {
        &self.data.available
    }

    pub fn stats(&self) -> StudentStats {
        let enrolled = &self.data.enrolled;
        if enrolled.is_empty() {
            return StudentStats::default();
        }
        let total: u32 = enrolled.iter().map(|c| u32::from(c.progress)).sum();
        let mean = (f64::from(total) / enrolled.len() as f64).round();

        StudentStats {
            enrolled: enrolled.len(),
            completed: enrolled.iter().filter(|c| c.progress == 100).count(),
            in_progress: enrolled
                .iter()
                .filter(|c| c.progress > 0 && c.progress < 100)
                .count(),
            overall_progress: mean.min(100.0) as u8,
        }
    }

    /// Enroll in `course_id` with zero progress, then reload. A duplicate
    /// enrollment is rejected by the backend and reported like any other
    /// write failure.
    pub async fn enroll(&mut self, course_id: &str) -> Result<Enrollment, Error> {
        let row = NewEnrollment {
            student_id: self.profile.id.clone(),
            course_id: course_id.to_string(),
            progress: 0,
        };

        let inserted = self
            .ctx
            .scoped(backend::insert_row::<NewEnrollment, Enrollment>(
                self.ctx.backend(),
                tables::ENROLLMENTS,
                &row,
            ))
            .await;

        let enrollment = match inserted {
            Ok(enrollment) => enrollment,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                if let Error::Conflict(_) = e {
                    warn!("{} is already enrolled in {}", self.profile.id, course_id);
                } else {
                    error!("enrollment in {} failed: {}", course_id, e);
                }
                self.ctx
                    .notifier()
                    .error(format!("Error enrolling in course: {}", e.user_message()));
                return Err(e);
            }
        };

        self.ctx.notifier().success("Successfully enrolled in course!");
        let _ = self.load().await;
        Ok(enrollment)
    }

    pub fn close(&self) {
        self.ctx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }
}

async fn fetch_student_data(backend: &dyn Backend, student_id: &str) -> Result<StudentData, Error> {
    let enrollments: Vec<Enrollment> = backend::fetch(
        backend,
        &Query::table(tables::ENROLLMENTS).eq("student_id", student_id),
    )
    .await?;

    let enrolled_ids: Vec<&str> = enrollments.iter().map(|e| e.course_id.as_str()).collect();
    let mut enrolled_courses: HashMap<String, Course> = if enrolled_ids.is_empty() {
        HashMap::new()
    } else {
        backend::fetch::<Course>(
            backend,
            &Query::table(tables::COURSES).in_list("id", &enrolled_ids),
        )
        .await?
        .into_iter()
        .map(|course| (course.id.clone(), course))
        .collect()
    };

    // Enrollment order; an enrollment whose course is gone is skipped
    let enrolled: Vec<EnrolledCourse> = enrollments
        .iter()
        .filter_map(|e| {
            enrolled_courses.remove(&e.course_id).map(|course| EnrolledCourse {
                course,
                progress: e.progress,
            })
        })
        .collect();

    let all: Vec<Course> = backend::fetch(backend, &Query::table(tables::COURSES)).await?;
    let taken: HashSet<&str> = enrolled_ids.into_iter().collect();
    let available = all
        .into_iter()
        .filter(|course| !taken.contains(course.id.as_str()))
        .collect();

    Ok(StudentData {
        enrolled,
        available,
    })
}
