//! Token rendering for path templates.
//!
//! A token is a named placeholder in the path format string. Every token has a
//! fixed entity level; rendering a token requires that level (or a lower one)
//! to be bound in the [`TokenContext`]. Unbound or absent attributes render as
//! the empty string, so rendering is total and deterministic.

use chrono::{DateTime, Datelike as _};
use serde::Serialize;
use studip_api::models::{Course, FileRef, Semester};

/// The four entity levels of the remote hierarchy, ordered outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityLevel {
    /// A semester.
    Semester,
    /// A course within a semester.
    Course,
    /// A folder within a course's file area.
    Folder,
    /// A file.
    File,
}

macro_rules! tokens {
    ($( $variant:ident => ($name:literal, $level:ident) ),+ $(,)?) => {
        /// The closed set of template tokens.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Token {
            $(
                #[doc = concat!("`{", $name, "}`")]
                $variant,
            )+
        }

        impl Token {
            /// All tokens, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Parse a token name as it appears between braces.
            #[must_use]
            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// The token's name, without braces.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// The entity level this token draws its value from.
            #[must_use]
            pub fn level(self) -> EntityLevel {
                match self {
                    $(Self::$variant => EntityLevel::$level,)+
                }
            }
        }
    };
}

tokens! {
    Path => ("path", Folder),
    ShortPath => ("short-path", Folder),
    Semester => ("semester", Semester),
    SemesterId => ("semester-id", Semester),
    SemesterLexical => ("semester-lexical", Semester),
    SemesterLexicalShort => ("semester-lexical-short", Semester),
    SemesterShort => ("semester-short", Semester),
    CourseTitle => ("course", Course),
    CourseAbbrev => ("course-abbrev", Course),
    CourseClass => ("course-class", Course),
    CourseDescription => ("course-description", Course),
    CourseGroup => ("course-group", Course),
    CourseId => ("course-id", Course),
    CourseLocation => ("course-location", Course),
    CourseNumber => ("course-number", Course),
    CourseSubtitle => ("course-subtitle", Course),
    CourseType => ("course-type", Course),
    CourseTypeShort => ("course-type-short", Course),
    FileDescription => ("file-description", File),
    FileDownloads => ("file-downloads", File),
    FileId => ("file-id", File),
    FileMimeType => ("file-mime-type", File),
    FileName => ("file-name", File),
    FileSize => ("file-size", File),
    FileStorage => ("file-storage", File),
    FileTerms => ("file-terms", File),
}

/// The entities bound along a path from the root, as seen by the renderer.
///
/// `path` / `short_path` carry the escaped folder components accumulated so
/// far: `path` from the course's top folder inclusive, `short_path` with a
/// generic-root component stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenContext<'a> {
    /// Bound semester, if any.
    pub semester: Option<&'a Semester>,
    /// Bound course, if any.
    pub course: Option<&'a Course>,
    /// Folder components from the top folder, escaped.
    pub path: Option<&'a [String]>,
    /// Folder components with the generic root stripped, escaped.
    pub short_path: Option<&'a [String]>,
    /// Bound file, if any.
    pub file: Option<&'a FileRef>,
}

/// Render one token against a context. Missing bindings yield `""`.
#[must_use]
pub fn render(token: Token, ctx: &TokenContext<'_>) -> String {
    match token {
        Token::Path => ctx.path.map(|p| p.join("/")).unwrap_or_default(),
        Token::ShortPath => ctx.short_path.map(|p| p.join("/")).unwrap_or_default(),

        Token::Semester => opt(ctx.semester, |s| escape_file_name(&s.title)),
        Token::SemesterId => opt(ctx.semester, |s| s.id.clone()),
        Token::SemesterLexical => opt(ctx.semester, |s| lexical(s.begin)),
        Token::SemesterLexicalShort => opt(ctx.semester, |s| lexical_short(s.begin)),
        Token::SemesterShort => opt(ctx.semester, |s| short(s.begin)),

        Token::CourseTitle => opt(ctx.course, |c| escape_file_name(&c.title)),
        Token::CourseAbbrev => opt(ctx.course, |c| abbreviate(&escape_file_name(&c.title))),
        Token::CourseClass => opt(ctx.course, |c| escape_file_name(&c.class_name)),
        Token::CourseDescription => {
            opt(ctx.course, |c| escape_opt(c.description.as_deref()))
        }
        Token::CourseGroup => opt(ctx.course, |c| c.group.clone().unwrap_or_default()),
        Token::CourseId => opt(ctx.course, |c| c.id.clone()),
        Token::CourseLocation => opt(ctx.course, |c| escape_opt(c.location.as_deref())),
        Token::CourseNumber => opt(ctx.course, |c| escape_opt(c.number.as_deref())),
        Token::CourseSubtitle => opt(ctx.course, |c| escape_opt(c.subtitle.as_deref())),
        Token::CourseType => opt(ctx.course, |c| escape_file_name(&c.type_name)),
        Token::CourseTypeShort => opt(ctx.course, |c| escape_file_name(&c.type_short)),

        Token::FileDescription => opt(ctx.file, |f| escape_opt(f.description.as_deref())),
        Token::FileDownloads => opt(ctx.file, |f| f.downloads.to_string()),
        Token::FileId => opt(ctx.file, |f| f.id.clone()),
        Token::FileMimeType => opt(ctx.file, |f| {
            f.mime_type.clone().unwrap_or_default().replace('/', "-")
        }),
        Token::FileName => opt(ctx.file, |f| escape_file_name(&f.name)),
        Token::FileSize => opt(ctx.file, |f| f.size.to_string()),
        Token::FileStorage => opt(ctx.file, |f| f.storage.clone().unwrap_or_default()),
        Token::FileTerms => opt(ctx.file, |f| f.terms.clone().unwrap_or_default()),
    }
}

/// All token values for a context, keyed by token name. This feeds the
/// `studip-fuse.known-tokens` extended attribute; unbound tokens map to `""`.
#[must_use]
pub fn known_tokens(ctx: &TokenContext<'_>) -> KnownTokens {
    KnownTokens(
        Token::ALL
            .iter()
            .map(|&t| (t.name(), render(t, ctx)))
            .collect(),
    )
}

/// Rendered token map, serialized as a flat JSON object.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct KnownTokens(pub std::collections::BTreeMap<&'static str, String>);

fn opt<E>(entity: Option<&E>, f: impl FnOnce(&E) -> String) -> String {
    entity.map(f).unwrap_or_default()
}

fn escape_opt(value: Option<&str>) -> String {
    value.map(escape_file_name).unwrap_or_default()
}

/// Make an entity title safe as a single path component.
///
/// German umlauts and sharp s are transliterated, other non-ASCII characters
/// dropped, and `/` / `:` runs replaced by `-`. The result is always free of
/// path separators. Whitespace is kept as-is; surrounding whitespace goes
/// away when a whole segment is rendered.
#[must_use]
pub fn escape_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        let replacement: &str = match c {
            'ä' => "ae",
            'Ä' => "Ae",
            'ö' => "oe",
            'Ö' => "Oe",
            'ü' => "ue",
            'Ü' => "Ue",
            'ß' => "ss",
            '/' | ':' => {
                pending_dash = true;
                continue;
            }
            c if c.is_ascii() => {
                if pending_dash {
                    out.push('-');
                    pending_dash = false;
                }
                out.push(c);
                continue;
            }
            _ => continue,
        };
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        out.push_str(replacement);
    }
    if pending_dash {
        out.push('-');
    }
    out
}

/// Abbreviate a course title: per whitespace-separated word, keep the leading
/// digits and the uppercase letters, preserving order. Runs on the escaped
/// title, so umlauts contribute their transliterated first letter.
#[must_use]
pub fn abbreviate(title: &str) -> String {
    let mut out = String::new();
    for word in title.split_whitespace() {
        out.extend(word.chars().take_while(char::is_ascii_digit));
        out.extend(
            word.chars()
                .skip_while(char::is_ascii_digit)
                .filter(|c| c.is_uppercase()),
        );
    }
    out
}

/// Season of a semester, computed from its begin date: winter semesters span
/// October through March, summer semesters April through September.
fn season(begin: i64) -> (i32, bool) {
    let date = DateTime::from_timestamp(begin, 0).unwrap_or(DateTime::UNIX_EPOCH);
    let (year, month) = (date.year(), date.month());
    match month {
        10..=12 => (year, true),
        1..=3 => (year - 1, true),
        _ => (year, false),
    }
}

/// Lexically sortable semester name, e.g. `"2018 WS -19"` or `"2019 SS"`.
fn lexical(begin: i64) -> String {
    match season(begin) {
        (year, true) => format!("{year} WS -{:02}", (year + 1) % 100),
        (year, false) => format!("{year} SS"),
    }
}

/// Compact lexically sortable semester name, e.g. `"2018WS"` or `"2019SS"`.
fn lexical_short(begin: i64) -> String {
    match season(begin) {
        (year, true) => format!("{year}WS"),
        (year, false) => format!("{year}SS"),
    }
}

/// Conventional short semester name, e.g. `"WS 18-19"` or `"SS 19"`.
fn short(begin: i64) -> String {
    match season(begin) {
        (year, true) => format!("WS {:02}-{:02}", year % 100, (year + 1) % 100),
        (year, false) => format!("SS {:02}", year % 100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semester(begin: i64) -> Semester {
        Semester {
            id: "beef".repeat(8),
            title: "WS 2018/19".to_owned(),
            begin,
            end: begin + 180 * 86400,
        }
    }

    // 2018-10-01 00:00:00 UTC
    const WS18_BEGIN: i64 = 1_538_352_000;
    // 2019-04-01 00:00:00 UTC
    const SS19_BEGIN: i64 = 1_554_076_800;
    // 2019-01-15 00:00:00 UTC — still WS 2018/19
    const WS18_LATE: i64 = 1_547_510_400;

    #[test]
    fn lexical_forms_follow_the_begin_date() {
        assert_eq!(lexical_short(WS18_BEGIN), "2018WS");
        assert_eq!(lexical(WS18_BEGIN), "2018 WS -19");
        assert_eq!(short(WS18_BEGIN), "WS 18-19");

        assert_eq!(lexical_short(SS19_BEGIN), "2019SS");
        assert_eq!(lexical(SS19_BEGIN), "2019 SS");
        assert_eq!(short(SS19_BEGIN), "SS 19");
    }

    #[test]
    fn winter_spans_january() {
        assert_eq!(lexical_short(WS18_LATE), "2018WS");
    }

    #[test]
    fn escape_transliterates_umlauts_and_separators() {
        assert_eq!(escape_file_name("Übung zur Einführung"), "Uebung zur Einfuehrung");
        assert_eq!(escape_file_name("Maß und Zahl"), "Mass und Zahl");
        assert_eq!(escape_file_name("a/b:c"), "a-b-c");
        assert_eq!(escape_file_name("π is dropped"), " is dropped");
        // Escaping preserves whitespace; segment rendering trims it.
        assert_eq!(escape_file_name("  padded  "), "  padded  ");
    }

    #[test]
    fn abbreviate_keeps_uppercase_letters_and_leading_digits() {
        assert_eq!(abbreviate("Algorithmen und Datenstrukturen"), "AD");
        assert_eq!(abbreviate("Advanced Databases"), "AD");
        assert_eq!(abbreviate("Mathematik 2"), "M2");
        assert_eq!(abbreviate(&escape_file_name("Übung GdP")), "UGP");
    }

    #[test]
    fn rendering_is_deterministic_and_total() {
        let sem = semester(WS18_BEGIN);
        let ctx = TokenContext {
            semester: Some(&sem),
            ..TokenContext::default()
        };
        for &token in Token::ALL {
            assert_eq!(render(token, &ctx), render(token, &ctx));
        }
        // Unbound levels render empty.
        assert_eq!(render(Token::CourseTitle, &ctx), "");
        assert_eq!(render(Token::FileName, &ctx), "");
        assert_eq!(render(Token::SemesterLexicalShort, &ctx), "2018WS");
    }

    #[test]
    fn token_names_round_trip_through_parse() {
        for &token in Token::ALL {
            assert_eq!(Token::parse(token.name()), Some(token));
        }
        assert_eq!(Token::parse("bogus"), None);
    }
}
