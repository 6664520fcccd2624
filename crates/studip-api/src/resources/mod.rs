//! Resource namespaces for the Stud.IP API.

mod courses;
mod discovery;
mod files;
mod folders;
mod semesters;
mod settings;
mod user;

pub use courses::CoursesResource;
pub use discovery::DiscoveryResource;
pub use files::FilesResource;
pub use folders::FoldersResource;
pub use semesters::SemestersResource;
pub use settings::SettingsResource;
pub use user::UserResource;
