//! Typed models for the Stud.IP JSON API.
//!
//! Field sets follow the Stud.IP REST routes (`/semesters`, `/user/:id/courses`,
//! `/folder/:id`, `/file/:id`). Stud.IP is sloppy about scalar types — numeric
//! fields arrive as numbers or strings depending on server version — so the
//! models lean on lenient deserializers where that matters.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// The authenticated user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    /// Globally unique user id (32 hex chars).
    #[serde(alias = "user_id")]
    pub id: String,
    /// Login name.
    pub username: String,
}

/// A semester snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Semester {
    /// Globally unique semester id.
    pub id: String,
    /// Human-readable title, e.g. `"WS 2018/19"`.
    pub title: String,
    /// Semester begin as a unix timestamp.
    #[serde(deserialize_with = "de_i64_lenient")]
    pub begin: i64,
    /// Semester end as a unix timestamp.
    #[serde(deserialize_with = "de_i64_lenient")]
    pub end: i64,
}

/// A course snapshot, enriched with semester-type/class names resolved
/// through the settings endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Course {
    /// Globally unique course id.
    #[serde(alias = "course_id")]
    pub id: String,
    /// Course title.
    pub title: String,
    /// Course number as assigned by the institution, e.g. `"10-201-2012"`.
    #[serde(default, deserialize_with = "de_opt_string_lenient")]
    pub number: Option<String>,
    /// Subtitle, if any.
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Display group number the user sorted this course into.
    #[serde(default, deserialize_with = "de_opt_string_lenient")]
    pub group: Option<String>,
    /// Location, if any.
    #[serde(default)]
    pub location: Option<String>,
    /// Raw course type key, resolved to names via [`Settings`].
    #[serde(rename = "type", default, deserialize_with = "de_opt_string_lenient")]
    pub type_key: Option<String>,
    /// Link or id of the first semester this course runs in.
    #[serde(default)]
    pub start_semester: Option<String>,
    /// Link or id of the last semester this course runs in.
    #[serde(default)]
    pub end_semester: Option<String>,

    /// Resolved course type name, e.g. `"Vorlesung"`. Filled by enrichment.
    #[serde(skip_deserializing, default)]
    pub type_name: String,
    /// Resolved short form of the course type, e.g. `"V"`.
    #[serde(skip_deserializing, default)]
    pub type_short: String,
    /// Resolved course class name, e.g. `"Lehre"`.
    #[serde(skip_deserializing, default)]
    pub class_name: String,
    /// Begin timestamp of the first semester. Filled by enrichment.
    #[serde(skip_deserializing, default)]
    pub start_begin: Option<i64>,
    /// Begin timestamp of the last semester. Filled by enrichment.
    #[serde(skip_deserializing, default)]
    pub end_begin: Option<i64>,
}

impl Course {
    /// Whether this course runs in the semester beginning at `semester_begin`.
    ///
    /// A course with no end semester runs indefinitely from its start.
    #[must_use]
    pub fn runs_in(&self, semester_begin: i64) -> bool {
        let after_start = self.start_begin.is_none_or(|s| s <= semester_begin);
        let before_end = self.end_begin.is_none_or(|e| semester_begin <= e);
        after_start && before_end
    }
}

/// A folder snapshot as returned by `/folder/:id` or `/course/:id/top_folder`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Folder {
    /// Globally unique folder id.
    pub id: String,
    /// Display name. The course root folder often carries a generic name
    /// such as `"Hauptordner"`.
    #[serde(default)]
    pub name: String,
    /// Parent folder id; absent for a course's top folder.
    #[serde(default, alias = "parent_id")]
    pub parent_folder_id: Option<String>,
    /// Owning course id.
    #[serde(default, alias = "range_id")]
    pub course_id: Option<String>,
    /// Child folders, as ids.
    #[serde(default)]
    pub subfolders: Vec<IdRef>,
    /// Child file references, as ids.
    #[serde(default)]
    pub file_refs: Vec<IdRef>,
}

/// A file reference snapshot as returned by `/file/:id`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRef {
    /// Globally unique file-ref id.
    pub id: String,
    /// File name, including extension.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// File size in bytes.
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub size: u64,
    /// MIME type reported by the server.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Storage backend identifier.
    #[serde(default)]
    pub storage: Option<String>,
    /// Terms-of-use key attached to the file.
    #[serde(default, alias = "content_terms_of_use_id")]
    pub terms: Option<String>,
    /// Download counter.
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub downloads: u64,
    /// Creation timestamp.
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub mkdate: i64,
    /// Last-change timestamp.
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub chdate: i64,
    /// Opaque content version token, when the server provides one.
    #[serde(default, alias = "digest")]
    pub content_hash: Option<String>,
}

impl FileRef {
    /// The version token keying the content cache, falling back to
    /// `"<chdate>-<size>"` when the server provides no digest.
    #[must_use]
    pub fn version_token(&self) -> String {
        self.content_hash
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.chdate, self.size))
    }
}

/// One entry of the `SEM_TYPE` settings table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SemType {
    /// Type name, e.g. `"Vorlesung"`.
    pub name: String,
    /// Key into the `SEM_CLASS` table.
    #[serde(deserialize_with = "de_string_lenient")]
    pub class: String,
    /// Optional short form, e.g. `"V"`.
    #[serde(default)]
    pub short: Option<String>,
}

/// One entry of the `SEM_CLASS` settings table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SemClass {
    /// Class name, e.g. `"Lehre"`.
    pub name: String,
}

/// The subset of `/studip/settings` the SDK consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Course type table, keyed by the course's raw `type` value.
    #[serde(rename = "SEM_TYPE", default)]
    pub sem_type: HashMap<String, SemType>,
    /// Course class table, keyed by `SemType::class`.
    #[serde(rename = "SEM_CLASS", default)]
    pub sem_class: HashMap<String, SemClass>,
}

/// The discovery document: a map of route to supported methods.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Discovery(pub HashMap<String, serde_json::Value>);

impl Discovery {
    /// Whether `route` is present and supports GET.
    #[must_use]
    pub fn supports_get(&self, route: &str) -> bool {
        self.0
            .get(route)
            .and_then(|methods| methods.get("get"))
            .is_some()
    }
}

/// A reference that arrives either as a bare id string or as an object
/// carrying an `id` field.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IdRef {
    /// Bare id.
    Id(String),
    /// Object form; extra fields are ignored.
    Object {
        /// The referenced id.
        id: String,
    },
}

impl IdRef {
    /// The referenced id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

/// Pagination envelope wrapping every collection route.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    /// The page's items. Stud.IP returns a map keyed by item URL for most
    /// routes and a plain array for some; both shapes are accepted.
    pub collection: serde_json::Value,
    /// Pagination counters.
    pub pagination: Pagination,
}

/// Pagination counters of a [`Page`].
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    /// Total number of items in the collection.
    #[serde(deserialize_with = "de_u64_lenient")]
    pub total: u64,
    /// Offset of this page.
    #[serde(deserialize_with = "de_u64_lenient")]
    pub offset: u64,
    /// Page size limit.
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub limit: u64,
}

/// Extract the trailing Stud.IP object id from a bare id, an API URL, or an
/// URL with a query string. Returns `None` if no id-shaped component exists.
#[must_use]
pub fn extract_id(value: &str) -> Option<&str> {
    let value = value.split('?').next().unwrap_or(value);
    let tail = value.rsplit('/').next().unwrap_or(value);
    let looks_like_id = (31..=32).contains(&tail.len())
        && tail.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    looks_like_id.then_some(tail)
}

fn de_string_lenient<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        S(String),
        I(i64),
    }
    Ok(match Lenient::deserialize(de)? {
        Lenient::S(s) => s,
        Lenient::I(i) => i.to_string(),
    })
}

fn de_opt_string_lenient<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        S(String),
        I(i64),
        None,
    }
    Ok(match Option::<Lenient>::deserialize(de)? {
        Some(Lenient::S(s)) => Some(s),
        Some(Lenient::I(i)) => Some(i.to_string()),
        Some(Lenient::None) | None => None,
    })
}

fn de_i64_lenient<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        I(i64),
        S(String),
    }
    match Lenient::deserialize(de)? {
        Lenient::I(i) => Ok(i),
        Lenient::S(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn de_u64_lenient<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        I(u64),
        S(String),
    }
    match Lenient::deserialize(de)? {
        Lenient::I(i) => Ok(i),
        Lenient::S(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
