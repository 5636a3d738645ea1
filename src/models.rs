//! Row types for the portal tables

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Table names
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const COURSES: &str = "courses";
    pub const ENROLLMENTS: &str = "enrollments";
    pub const EVENTS: &str = "events";
}

/// Credential record issued by the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Portal role. Unknown strings read from storage parse as `Student`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "instructor" => Role::Instructor,
            "student" => Role::Student,
            other => {
                warn!("unknown role {:?}, treating as student", other);
                Role::Student
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `profiles` row, keyed by the identity id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert payload for `profiles`
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

/// `courses` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub instructor_id: String,
    pub price: f64,
    pub duration: String,
    pub level: CourseLevel,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Rating maintained outside this client; absent for most rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert payload for `courses`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub instructor_id: String,
    pub price: f64,
    pub duration: String,
    pub level: CourseLevel,
}

/// `enrollments` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub progress: u8,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for `enrollments`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEnrollment {
    pub student_id: String,
    pub course_id: String,
    pub progress: u8,
}

/// `events` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub event_date: DateTime<Utc>,
    pub location: String,
    pub max_participants: u32,
    #[serde(default)]
    pub current_participants: u32,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn seats_left(&self) -> u32 {
        self.max_participants
            .saturating_sub(self.current_participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_round_trips_lowercase() {
        assert_eq!(serde_json::to_value(Role::Instructor).unwrap(), json!("instructor"));
        assert_eq!(serde_json::from_value::<Role>(json!("admin")).unwrap(), Role::Admin);
    }

    #[test]
    fn unknown_role_reads_as_student() {
        assert_eq!(serde_json::from_value::<Role>(json!("guest")).unwrap(), Role::Student);
        assert_eq!(Role::parse(" Instructor "), Role::Instructor);
    }

    #[test]
    fn course_without_rating_reads_none() {
        let course: Course = serde_json::from_value(json!({
            "id": "c1",
            "title": "Rust",
            "description": "Systems programming",
            "instructor_id": "i1",
            "price": 199.0,
            "duration": "8 weeks",
            "level": "intermediate",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();

        assert_eq!(course.rating, None);
        assert_eq!(course.level, CourseLevel::Intermediate);
    }

    #[test]
    fn seats_left_saturates() {
        let event: Event = serde_json::from_value(json!({
            "id": "e1",
            "title": "Hack The Web",
            "description": "Hackathon",
            "event_date": "2025-01-15T09:00:00Z",
            "location": "Campus",
            "max_participants": 100,
            "current_participants": 120,
            "created_at": "2024-12-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.seats_left(), 0);
    }
}
