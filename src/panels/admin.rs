use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{contains_ignore_case, PanelContext};
use crate::backend::{self, Backend, Query};
use crate::error::Error;
use crate::models::{tables, Course, Profile, Role};
use crate::notify::Notifier;

/// Share of list prices shown as the revenue estimate
pub const REVENUE_FACTOR: f64 = 0.1;

/// Headline numbers for the admin dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct AdminOverview {
    pub total_users: usize,
    pub students: usize,
    pub instructors: usize,
    pub admins: usize,
    pub total_courses: usize,
    /// Σ price × [`REVENUE_FACTOR`]. An indicator, not an accounting figure.
    pub revenue_estimate: f64,
}

impl AdminOverview {
    fn from_rows(users: &[Profile], courses: &[Course]) -> Self {
        let with_role = |role: Role| users.iter().filter(|u| u.role == role).count();
        let list_total: f64 = courses.iter().map(|c| c.price).sum();
        Self {
            total_users: users.len(),
            students: with_role(Role::Student),
            instructors: with_role(Role::Instructor),
            admins: with_role(Role::Admin),
            total_courses: courses.len(),
            revenue_estimate: list_total * REVENUE_FACTOR,
        }
    }

    /// e.g. `"$46K"`. Halves round up.
    pub fn revenue_label(&self) -> String {
        format!("${:.0}K", self.revenue_estimate.round())
    }
}

/// All users and all courses
pub struct AdminPanel {
    ctx: PanelContext,
    users: Vec<Profile>,
    courses: Vec<Course>,
}

impl AdminPanel {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier, scope: CancellationToken) -> Self {
        Self {
            ctx: PanelContext::new(backend, notifier, scope),
            users: Vec::new(),
            courses: Vec::new(),
        }
    }

    /// Fetch users and courses, newest first. On failure the previous rows
    /// are kept and an error notice is sent.
    pub async fn load(&mut self) -> Result<(), Error> {
        let backend = self.ctx.backend();
        let courses_query = Query::table(tables::COURSES).order("created_at", false);
        let users_query = Query::table(tables::PROFILES).order("created_at", false);

        let fetched = self
            .ctx
            .scoped(async {
                tokio::try_join!(
                    backend::fetch::<Course>(backend, &courses_query),
                    backend::fetch::<Profile>(backend, &users_query),
                )
            })
            .await;

        match fetched {
            Ok((courses, users)) => {
                info!("admin panel loaded {} users, {} courses", users.len(), courses.len());
                self.courses = courses;
                self.users = users;
                Ok(())
            }
            Err(e) => {
                self.ctx.fetch_failed("admin", &e);
                Err(e)
            }
        }
    }

    pub fn users(&self) -> &[Profile] {
        &self.users
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn overview(&self) -> AdminOverview {
        AdminOverview::from_rows(&self.users, &self.courses)
    }

    /// Users whose name or email contains `term`, ignoring case
    pub fn search_users(&self, term: &str) -> Vec<&Profile> {
        self.users
            .iter()
            .filter(|u| contains_ignore_case(&u.full_name, term) || contains_ignore_case(&u.email, term))
            .collect()
    }

    /// Courses whose title contains `term`, ignoring case
    pub fn search_courses(&self, term: &str) -> Vec<&Course> {
        self.courses
            .iter()
            .filter(|c| contains_ignore_case(&c.title, term))
            .collect()
    }

    /// End the view scope; later loads fail with [`Error::Cancelled`]
    pub fn close(&self) {
        self.ctx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn seeded() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(
                tables::PROFILES,
                vec![
                    json!({"id": "a1", "email": "root@academy.dev", "full_name": "Ada Admin", "role": "admin"}),
                    json!({"id": "i1", "email": "ian@academy.dev", "full_name": "Ian Instructor", "role": "instructor"}),
                    json!({"id": "s1", "email": "sam@academy.dev", "full_name": "Sam Student", "role": "student"}),
                    json!({"id": "s2", "email": "jo@academy.dev", "full_name": "Jo Learner", "role": "student"}),
                ],
            )
            .unwrap();
        backend
            .seed(
                tables::COURSES,
                vec![
                    json!({"id": "c1", "title": "React Mastery", "description": "d", "instructor_id": "i1",
                           "price": 299.0, "duration": "8 weeks", "level": "intermediate"}),
                    json!({"id": "c2", "title": "Python Basics", "description": "d", "instructor_id": "i1",
                           "price": 161.0, "duration": "4 weeks", "level": "beginner"}),
                ],
            )
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn overview_counts_roles_and_revenue() {
        let (notifier, _notices) = Notifier::channel();
        let mut panel = AdminPanel::new(seeded(), notifier, CancellationToken::new());

        panel.load().await.unwrap();
        let overview = panel.overview();

        assert_eq!(overview.total_users, 4);
        assert_eq!(overview.students, 2);
        assert_eq!(overview.instructors, 1);
        assert_eq!(overview.admins, 1);
        assert_eq!(overview.total_courses, 2);
        assert_eq!(overview.revenue_label(), "$46K");
    }

    #[test]
    fn revenue_label_rounds_halves_up() {
        let overview = |list_total: f64| AdminOverview {
            total_users: 0,
            students: 0,
            instructors: 0,
            admins: 0,
            total_courses: 0,
            revenue_estimate: list_total * REVENUE_FACTOR,
        };

        assert_eq!(overview(45.0).revenue_label(), "$5K");
        assert_eq!(overview(25.0).revenue_label(), "$3K");
        assert_eq!(overview(44.0).revenue_label(), "$4K");
        assert_eq!(overview(0.0).revenue_label(), "$0K");
    }

    #[tokio::test]
    async fn search_matches_name_email_and_title() {
        let (notifier, _notices) = Notifier::channel();
        let mut panel = AdminPanel::new(seeded(), notifier, CancellationToken::new());
        panel.load().await.unwrap();

        let users: Vec<_> = panel.search_users("SAM").into_iter().map(|u| u.id.as_str()).collect();
        assert_eq!(users, vec!["s1"]);
        assert_eq!(panel.search_users("academy.dev").len(), 4);
        assert_eq!(panel.search_courses("python").len(), 1);
    }

    #[tokio::test]
    async fn failed_reload_keeps_rows() {
        let backend = seeded();
        let (notifier, mut notices) = Notifier::channel();
        let mut panel = AdminPanel::new(backend.clone(), notifier, CancellationToken::new());
        panel.load().await.unwrap();

        backend.set_offline(true);
        assert!(panel.load().await.is_err());

        assert_eq!(panel.users().len(), 4);
        assert!(notices.try_recv().unwrap().message.starts_with("Error fetching data:"));
    }
}
