use crate::core::diff_parser::{Hunk, ParseError, PatchSet};
use crate::core::paths::{resolve_in_repo, strip_source_prefix};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewComment {
    pub path: String,
    pub line: usize,
    pub side: Side,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewPayload {
    pub body: String,
    pub comments: Vec<ReviewComment>,
}

/// Turns formatter hunks into suggestion comments on the files a caller
/// cares about.
pub struct DiffReviewBuilder<'a> {
    repo_root: &'a Path,
    allowed_files: &'a HashSet<PathBuf>,
}

impl<'a> DiffReviewBuilder<'a> {
    pub fn new(repo_root: &'a Path, allowed_files: &'a HashSet<PathBuf>) -> Self {
        Self {
            repo_root,
            allowed_files,
        }
    }

    pub fn build(
        &self,
        diff_text: &str,
        review_body: &str,
        inline_message: &str,
    ) -> Result<ReviewPayload, ParseError> {
        let patch_set = PatchSet::parse(diff_text)?;
        Ok(self.build_from_patch_set(&patch_set, review_body, inline_message))
    }

    pub fn build_from_patch_set(
        &self,
        patch_set: &PatchSet,
        review_body: &str,
        inline_message: &str,
    ) -> ReviewPayload {
        let mut comments = Vec::new();

        for patch in patch_set {
            let file_path = strip_source_prefix(&patch.source_file);
            let resolved = resolve_in_repo(self.repo_root, file_path);
            if !self.allowed_files.contains(&resolved) {
                debug!("Skipping {}: not in the allowed files", resolved.display());
                continue;
            }

            for hunk in &patch.hunks {
                comments.push(suggestion_comment(file_path, hunk, inline_message));
            }
        }

        debug!("Built {} suggestion comment(s)", comments.len());

        ReviewPayload {
            body: review_body.to_string(),
            comments,
        }
    }
}

/// One-call form of [`DiffReviewBuilder`].
pub fn diff_to_review(
    repo_root: &Path,
    diff_text: &str,
    review_body: &str,
    inline_message: &str,
    allowed_files: &HashSet<PathBuf>,
) -> Result<ReviewPayload, ParseError> {
    DiffReviewBuilder::new(repo_root, allowed_files).build(diff_text, review_body, inline_message)
}

fn suggestion_comment(file_path: &str, hunk: &Hunk, inline_message: &str) -> ReviewComment {
    let mut suggestion = String::new();
    for line in hunk.target_lines() {
        suggestion.push_str(&line.value);
        if !line.value.ends_with('\n') {
            suggestion.push('\n');
        }
    }

    // Pure insertions (source_length == 0) have no original line; clamp at 0.
    let line = hunk
        .source_start
        .saturating_add(hunk.source_length)
        .saturating_sub(1);
    let start_line = (hunk.source_start < line).then_some(hunk.source_start);

    ReviewComment {
        path: file_path.to_string(),
        line,
        side: Side::Right,
        body: format!("{}\n\n```suggestion\n{}```", inline_message, suggestion),
        start_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BODY: &str = "Formatting issues found.";
    const INLINE: &str = "Formatter suggestion below:";

    fn allowed(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn skips_files_outside_whitelist() {
        let diff = "--- a/other.py\n+++ b/other.py\n@@ -1 +1 @@\n-x=1\n+x = 1\n";
        let payload = diff_to_review(
            Path::new("/repo"),
            diff,
            BODY,
            INLINE,
            &allowed(&["/repo/src/foo.py"]),
        )
        .unwrap();

        assert_eq!(payload.body, BODY);
        assert!(payload.comments.is_empty());
    }

    #[test]
    fn single_line_hunk_has_no_start_line() {
        let diff = "--- a/src/foo.py\n+++ b/src/foo.py\n@@ -10 +10 @@\n-x=1\n+x = 1\n";
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = DiffReviewBuilder::new(Path::new("/repo"), &files)
            .build(diff, BODY, INLINE)
            .unwrap();

        assert_eq!(payload.comments.len(), 1);
        let comment = &payload.comments[0];
        assert_eq!(comment.path, "src/foo.py");
        assert_eq!(comment.line, 10);
        assert_eq!(comment.start_line, None);
        assert_eq!(comment.side, Side::Right);
        assert_eq!(
            comment.body,
            "Formatter suggestion below:\n\n```suggestion\nx = 1\n```"
        );

        let value = serde_json::to_value(comment).unwrap();
        assert_eq!(
            value,
            json!({
                "path": "src/foo.py",
                "line": 10,
                "side": "RIGHT",
                "body": comment.body,
            })
        );
    }

    #[test]
    fn multi_line_hunk_spans_original_range() {
        let diff = "\
--- a/src/foo.py
+++ b/src/foo.py
@@ -5,4 +5,2 @@
-def f( a,
-       b ):
-    return a+b
-
+def f(a, b):
+    return a + b
";
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap();

        let comment = &payload.comments[0];
        assert_eq!(comment.line, 8);
        assert_eq!(comment.start_line, Some(5));
        assert!(comment
            .body
            .ends_with("```suggestion\ndef f(a, b):\n    return a + b\n```"));
        assert_eq!(serde_json::to_value(comment).unwrap()["start_line"], 5);
    }

    #[test]
    fn missing_final_newline_is_restored() {
        let diff = "\
--- a/src/foo.py
+++ b/src/foo.py
@@ -3,2 +3,2 @@
 a = 1
-b=2
\\ No newline at end of file
+b = 2
\\ No newline at end of file
";
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap();

        let body = &payload.comments[0].body;
        assert!(body.ends_with("```suggestion\na = 1\nb = 2\n```"));
        assert!(!body.ends_with("\n\n```"));
    }

    #[test]
    fn keeps_patch_and_hunk_order_for_allowed_files_only() {
        let diff = "\
diff --git a/src/a.cpp b/src/a.cpp
--- a/src/a.cpp
+++ b/src/a.cpp
@@ -1 +1 @@
-int  a;
+int a;
@@ -20,2 +20,1 @@
-int  b;
-int  c;
+int b, c;
diff --git a/vendor/x.cpp b/vendor/x.cpp
--- a/vendor/x.cpp
+++ b/vendor/x.cpp
@@ -7 +7 @@
-int  x;
+int x;
";
        let files = allowed(&["/repo/src/a.cpp"]);
        let payload = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap();

        let lines: Vec<(usize, Option<usize>)> = payload
            .comments
            .iter()
            .map(|c| (c.line, c.start_line))
            .collect();
        assert_eq!(lines, vec![(1, None), (21, Some(20))]);
        assert!(payload.comments.iter().all(|c| c.path == "src/a.cpp"));
    }

    #[test]
    fn whitelist_uses_normalized_path_but_comment_keeps_raw_path() {
        let diff = "--- a/src/./lib/../foo.py\n+++ b/src/foo.py\n@@ -2 +2 @@\n-y=2\n+y = 2\n";
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap();

        assert_eq!(payload.comments.len(), 1);
        assert_eq!(payload.comments[0].path, "src/./lib/../foo.py");
    }

    #[test]
    fn pure_insertion_does_not_underflow() {
        let diff = "--- a/src/foo.py\n+++ b/src/foo.py\n@@ -0,0 +1 @@\n+import os\n";
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap();

        assert_eq!(payload.comments[0].line, 0);
        assert_eq!(payload.comments[0].start_line, None);
    }

    #[test]
    fn line_arithmetic_saturates_on_huge_ranges() {
        let patch_set = PatchSet {
            patches: vec![crate::core::Patch {
                source_file: "a/src/foo.py".to_string(),
                target_file: "b/src/foo.py".to_string(),
                hunks: vec![Hunk {
                    source_start: usize::MAX,
                    source_length: 2,
                    target_start: 1,
                    target_length: 0,
                    section_header: String::new(),
                    lines: Vec::new(),
                }],
            }],
        };
        let files = allowed(&["/repo/src/foo.py"]);
        let payload = DiffReviewBuilder::new(Path::new("/repo"), &files)
            .build_from_patch_set(&patch_set, BODY, INLINE);

        assert_eq!(payload.comments[0].line, usize::MAX - 1);
        assert_eq!(payload.comments[0].start_line, None);
    }

    #[test]
    fn header_past_usize_is_a_parse_error() {
        let diff = format!(
            "--- a/src/foo.py\n+++ b/src/foo.py\n@@ -{},1 +1 @@\n-a\n+b\n",
            usize::MAX
        );
        let files = allowed(&["/repo/src/foo.py"]);
        let err = diff_to_review(Path::new("/repo"), &diff, BODY, INLINE, &files).unwrap_err();

        assert!(matches!(err, ParseError::InvalidHunkHeader { line: 3, .. }));
    }

    #[test]
    fn malformed_diff_propagates_parse_error() {
        let diff = "--- a/src/foo.py\n+++ b/src/foo.py\n@@ broken @@\n";
        let files = allowed(&["/repo/src/foo.py"]);
        let err = diff_to_review(Path::new("/repo"), diff, BODY, INLINE, &files).unwrap_err();

        assert!(matches!(err, ParseError::InvalidHunkHeader { line: 3, .. }));
    }
}
