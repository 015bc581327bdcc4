//! Turns configured accounts into scheduler tasks.

use crate::client::{ClientFactory, Course};
use crate::config::UserAccount;
use crate::error::ClientError;
use crate::study::task::Task;

/// Pick the courses matching any of `names`; every course when `names` is
/// empty. A course matched by several names is kept once.
pub fn select_courses(courses: &[Course], names: &[String]) -> Vec<Course> {
    if names.is_empty() {
        return courses.to_vec();
    }

    let mut selected: Vec<Course> = Vec::new();
    for name in names {
        let matches: Vec<&Course> = courses.iter().filter(|c| c.matches_name(name)).collect();
        if matches.is_empty() {
            tracing::warn!(filter = %name, "No course matches filter");
            continue;
        }
        tracing::info!(filter = %name, matches = matches.len(), "Course filter matched");
        for course in matches {
            if !selected.iter().any(|c| c.id == course.id) {
                selected.push(course.clone());
            }
        }
    }
    selected
}

/// Log in as `user`, list its courses and build one task per selected course.
pub async fn plan_user(
    factory: &dyn ClientFactory,
    user: &UserAccount,
) -> Result<Vec<Task>, ClientError> {
    let client = factory.create(user);
    client.login().await?;
    let courses = client.list_courses().await?;
    tracing::info!(user = %user.username, courses = courses.len(), "Fetched enrolled courses");

    Ok(select_courses(&courses, &user.course_names)
        .into_iter()
        .map(|course| Task::new(user.clone(), course))
        .collect())
}

/// Plan every account. Accounts that fail to log in or list courses are
/// logged and skipped.
pub async fn plan(factory: &dyn ClientFactory, users: &[UserAccount]) -> Vec<Task> {
    let mut tasks = Vec::new();
    for user in users {
        match plan_user(factory, user).await {
            Ok(user_tasks) => tasks.extend(user_tasks),
            Err(e) => {
                tracing::error!(user = %user.username, "Failed to plan tasks: {e}");
            }
        }
    }
    if tasks.is_empty() {
        tracing::warn!("No tasks planned");
    }
    tasks
}
