//! Template compilation properties exercised through the public API.

use studip_fuse::fs::template::{PathTemplate, TemplateError};

/// Compiling the display form of a compiled template is a no-op.
#[test]
fn compile_display_compile_round_trips() {
    let formats = [
        "{semester-lexical-short}/{course}/{course-type}/{short-path}/{file-name}",
        "{semester}/{course}/{file-name}",
        "{course-abbrev}/{file-name}",
        "{semester-lexical}/{course-class}/{course}/{course-type}/{short-path}/{file-name}",
        "{course-number} {course}/{file-name}",
        "{path}/{file-name}",
        "{file-id}/{file-name}",
        "{file-name}",
    ];
    for format in formats {
        let compiled = PathTemplate::compile(format).expect(format);
        let rendered = compiled.to_string();
        assert_eq!(rendered, format, "display must reproduce the source");
        let recompiled = PathTemplate::compile(&rendered).expect("recompile");
        assert_eq!(recompiled, compiled, "round trip is a no-op");
    }
}

#[test]
fn every_invalid_shape_is_reported_before_mounting() {
    let cases: [(&str, fn(&TemplateError) -> bool); 8] = [
        ("{bogus}/{file-name}", |e| {
            matches!(e, TemplateError::UnknownToken(name) if name == "bogus")
        }),
        ("{course/{file-name}", |e| {
            matches!(e, TemplateError::UnbalancedBraces(_))
        }),
        ("{course}}/{file-name}", |e| {
            matches!(e, TemplateError::UnbalancedBraces(_))
        }),
        ("{course}//{file-name}", |e| {
            matches!(e, TemplateError::EmptySegment)
        }),
        ("/{course}/{file-name}", |e| {
            matches!(e, TemplateError::LeadingOrTrailingSlash)
        }),
        ("{course}/{semester}/{file-name}", |e| {
            matches!(e, TemplateError::LevelRegression { .. })
        }),
        ("{semester}/{course}", |e| {
            matches!(e, TemplateError::MissingFileSegment)
        }),
        ("{course}/x{short-path}/{file-name}", |e| {
            matches!(e, TemplateError::FolderTokenNotAlone { .. })
        }),
    ];

    for (format, matches_expected) in cases {
        let err = PathTemplate::compile(format).expect_err(format);
        assert!(matches_expected(&err), "format {format:?} produced {err:?}");
    }
}
