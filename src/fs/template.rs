//! Path template compilation.
//!
//! A template such as `{semester-lexical-short}/{course}/{short-path}/{file-name}`
//! is compiled into an ordered list of segments, one per virtual directory
//! level. Each segment interleaves literal text with token references and is
//! classified by the highest entity level it references; that level decides
//! which remote entities the resolver enumerates when expanding a directory at
//! this depth.

use std::fmt;

use thiserror::Error;

use crate::fs::tokens::{self, EntityLevel, Token, TokenContext};

/// Errors produced while compiling a format string. All of these are
/// reported before anything is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A brace-enclosed name is not in the token set.
    #[error("unknown token {{{0}}}")]
    UnknownToken(String),

    /// A `{` without matching `}`, or a stray `}`.
    #[error("unbalanced braces in segment '{0}'")]
    UnbalancedBraces(String),

    /// Two consecutive `/`.
    #[error("empty path segment")]
    EmptySegment,

    /// The format string starts or ends with `/`.
    #[error("leading or trailing '/' in format string")]
    LeadingOrTrailingSlash,

    /// A segment references a lower entity level than one already consumed.
    #[error("segment '{segment}' steps back to level already fixed earlier in the template")]
    LevelRegression {
        /// Display form of the offending segment.
        segment: String,
    },

    /// The last segment must name files, and must not be a folder path.
    #[error("the final segment must reference file metadata (e.g. {{file-name}})")]
    MissingFileSegment,

    /// `{path}`/`{short-path}` must stand alone in their segment.
    #[error("'{segment}' mixes a folder path token with other content")]
    FolderTokenNotAlone {
        /// Display form of the offending segment.
        segment: String,
    },

    /// At most one `{path}`/`{short-path}` segment is allowed.
    #[error("more than one folder path segment")]
    DuplicateFolderSegment,
}

/// One literal or token fragment of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Literal text, copied verbatim into the rendered name.
    Literal(String),
    /// A token reference.
    Token(Token),
}

/// One `/`-separated unit of the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    fragments: Vec<Fragment>,
    level: Option<EntityLevel>,
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut fragments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if !literal.is_empty() {
                        fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(TemplateError::UnbalancedBraces(raw.to_owned()));
                            }
                            Some(c) => name.push(c),
                        }
                    }
                    let token = Token::parse(&name)
                        .ok_or_else(|| TemplateError::UnknownToken(name.clone()))?;
                    fragments.push(Fragment::Token(token));
                }
                '}' => return Err(TemplateError::UnbalancedBraces(raw.to_owned())),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            fragments.push(Fragment::Literal(literal));
        }

        let level = fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Token(t) => Some(t.level()),
                Fragment::Literal(_) => None,
            })
            .max();

        Ok(Self { fragments, level })
    }

    /// The segment's entity level: the maximum level among its tokens, or
    /// `None` for a purely literal segment.
    #[must_use]
    pub fn level(&self) -> Option<EntityLevel> {
        self.level
    }

    /// The folder path token (`{path}` or `{short-path}`) if this segment is
    /// a folder segment.
    #[must_use]
    pub fn folder_token(&self) -> Option<Token> {
        self.fragments.iter().find_map(|f| match f {
            Fragment::Token(t @ (Token::Path | Token::ShortPath)) => Some(*t),
            _ => None,
        })
    }

    /// The tokens referenced by this segment, in order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.fragments.iter().filter_map(|f| match f {
            Fragment::Token(t) => Some(*t),
            Fragment::Literal(_) => None,
        })
    }

    /// Render the segment against a context and trim surrounding whitespace.
    #[must_use]
    pub fn render(&self, ctx: &TokenContext<'_>) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(text) => out.push_str(text),
                Fragment::Token(token) => out.push_str(&tokens::render(*token, ctx)),
            }
        }
        out.trim().to_owned()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(text) => f.write_str(text)?,
                Fragment::Token(token) => write!(f, "{{{}}}", token.name())?,
            }
        }
        Ok(())
    }
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Compile and validate a format string.
    pub fn compile(format: &str) -> Result<Self, TemplateError> {
        if format.starts_with('/') || format.ends_with('/') {
            return Err(TemplateError::LeadingOrTrailingSlash);
        }

        let mut segments = Vec::new();
        for raw in format.split('/') {
            if raw.is_empty() {
                return Err(TemplateError::EmptySegment);
            }
            segments.push(Segment::parse(raw)?);
        }

        // Levels may only grow along the template: once a segment has fixed
        // courses, an earlier-level segment (e.g. {semester}) cannot follow.
        let mut reached: Option<EntityLevel> = None;
        for segment in &segments {
            if let Some(level) = segment.level() {
                if reached.is_some_and(|r| level < r) {
                    return Err(TemplateError::LevelRegression {
                        segment: segment.to_string(),
                    });
                }
                reached = Some(level);
            }
        }

        // The last segment must name files so leaves exist, and folder path
        // tokens (which span multiple directory levels) cannot terminate it.
        let last = segments
            .last()
            .unwrap_or_else(|| unreachable!("split('/') yields at least one segment"));
        if last.level() != Some(EntityLevel::File) || last.folder_token().is_some() {
            return Err(TemplateError::MissingFileSegment);
        }

        // A folder segment expands one remote folder level per directory
        // level; mixing it with literals or other tokens in one segment has
        // no coherent rendering, and a second one would re-walk the tree.
        let mut folder_segments = 0;
        for segment in &segments {
            if let Some(_token) = segment.folder_token() {
                if segment.fragments.len() != 1 {
                    return Err(TemplateError::FolderTokenNotAlone {
                        segment: segment.to_string(),
                    });
                }
                folder_segments += 1;
            }
        }
        if folder_segments > 1 {
            return Err(TemplateError::DuplicateFolderSegment);
        }

        Ok(Self { segments })
    }

    /// The template's segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment at `index`, or `None` past the end.
    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the template has no segments. Never true for a compiled
    /// template.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}
