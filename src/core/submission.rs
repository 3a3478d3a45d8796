use crate::core::review::{ReviewComment, ReviewPayload, Side};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{info, warn};

pub const DEFAULT_SUGGESTIONS_PER_REVIEW: usize = 15;

static TARGET_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").unwrap());

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Comment,
    RequestChanges,
    Approve,
}

impl Default for ReviewEvent {
    fn default() -> Self {
        ReviewEvent::RequestChanges
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub body: String,
    pub event: ReviewEvent,
    pub comments: Vec<ReviewComment>,
}

impl ReviewPayload {
    pub fn with_event(self, event: ReviewEvent) -> ReviewSubmission {
        ReviewSubmission {
            body: self.body,
            event,
            comments: self.comments,
        }
    }
}

impl ReviewSubmission {
    /// Breaks a large review into numbered ones; big reviews tend to time
    /// out on the server side.
    pub fn split(self, per_review: usize) -> Vec<ReviewSubmission> {
        let per_review = per_review.max(1);
        let total = (self.comments.len() + per_review - 1) / per_review;

        self.comments
            .chunks(per_review)
            .enumerate()
            .map(|(idx, chunk)| ReviewSubmission {
                body: format!("{} ({}/{})", self.body, idx + 1, total),
                event: self.event,
                comments: chunk.to_vec(),
            })
            .collect()
    }
}

/// A file entry as listed for a pull request. Removed binaries and the
/// like come without a patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
    #[serde(default)]
    pub patch: Option<String>,
}

/// A review comment that already exists on the pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedComment {
    pub path: String,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub side: Option<Side>,
    pub body: String,
}

impl PostedComment {
    fn matches(&self, comment: &ReviewComment) -> bool {
        self.path == comment.path
            && self.line == Some(comment.line)
            && self.side == Some(comment.side)
            && self.body == comment.body
    }
}

/// Lines of each pull request file that fall inside a changed hunk, the
/// only places a review comment can be attached to.
#[derive(Debug, Default)]
pub struct CommentableLines {
    ranges: HashMap<String, Vec<Range<usize>>>,
}

impl CommentableLines {
    pub fn from_files(files: &[PullRequestFile]) -> Self {
        let mut commentable = Self::default();
        for file in files {
            if let Some(patch) = &file.patch {
                commentable.add_patch(&file.filename, patch);
            }
        }
        commentable
    }

    pub fn add_patch(&mut self, filename: &str, patch: &str) {
        let entry = self.ranges.entry(filename.to_string()).or_default();
        for caps in TARGET_RANGE.captures_iter(patch) {
            let start = caps[1].parse::<usize>();
            let len = caps.get(2).map_or(Ok(1), |m| m.as_str().parse::<usize>());
            match (start, len) {
                (Ok(start), Ok(len)) => entry.push(start..start.saturating_add(len)),
                _ => warn!("Ignoring unreadable hunk range `{}` in {}", &caps[0], filename),
            }
        }
    }

    pub fn contains(&self, path: &str, line: usize) -> bool {
        self.ranges
            .get(path)
            .map_or(false, |ranges| ranges.iter().any(|range| range.contains(&line)))
    }
}

pub fn retain_commentable(
    comments: Vec<ReviewComment>,
    commentable: &CommentableLines,
) -> Vec<ReviewComment> {
    comments
        .into_iter()
        .filter(|c| commentable.contains(&c.path, c.line))
        .collect()
}

pub fn exclude_posted(comments: Vec<ReviewComment>, posted: &[PostedComment]) -> Vec<ReviewComment> {
    comments
        .into_iter()
        .filter(|c| !posted.iter().any(|p| p.matches(c)))
        .collect()
}

/// Narrows a submission down to what can and should still be posted, then
/// splits it into reviews of at most `per_review` comments.
pub fn plan_reviews(
    submission: ReviewSubmission,
    files: &[PullRequestFile],
    posted: &[PostedComment],
    per_review: usize,
) -> Vec<ReviewSubmission> {
    let total = submission.comments.len();
    let commentable = CommentableLines::from_files(files);
    let comments = retain_commentable(submission.comments, &commentable);
    let outside = total - comments.len();
    let comments = exclude_posted(comments, posted);
    let duplicates = total - outside - comments.len();

    if outside > 0 || duplicates > 0 {
        info!(
            "Dropped {} comment(s) outside the changed lines and {} already posted",
            outside, duplicates
        );
    }

    ReviewSubmission {
        body: submission.body,
        event: submission.event,
        comments,
    }
    .split(per_review)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(path: &str, line: usize) -> ReviewComment {
        ReviewComment {
            path: path.to_string(),
            line,
            side: Side::Right,
            body: format!("fix {}:{}", path, line),
            start_line: None,
        }
    }

    fn submission(comments: Vec<ReviewComment>) -> ReviewSubmission {
        ReviewPayload {
            body: "Formatting issues".to_string(),
            comments,
        }
        .with_event(ReviewEvent::RequestChanges)
    }

    #[test]
    fn submission_serializes_event() {
        let value = serde_json::to_value(submission(vec![comment("a.cpp", 1)])).unwrap();
        assert_eq!(value["event"], "REQUEST_CHANGES");
        assert_eq!(value["body"], "Formatting issues");
        assert_eq!(value["comments"][0]["side"], "RIGHT");
    }

    #[test]
    fn split_numbers_each_review() {
        let comments = (1..=16).map(|n| comment("a.cpp", n)).collect();
        let reviews = submission(comments).split(DEFAULT_SUGGESTIONS_PER_REVIEW);

        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].body, "Formatting issues (1/2)");
        assert_eq!(reviews[0].comments.len(), 15);
        assert_eq!(reviews[1].body, "Formatting issues (2/2)");
        assert_eq!(reviews[1].comments[0].line, 16);
        assert_eq!(reviews[1].event, ReviewEvent::RequestChanges);
    }

    #[test]
    fn split_of_nothing_is_nothing() {
        assert!(submission(Vec::new()).split(15).is_empty());
        assert_eq!(submission(vec![comment("a.cpp", 1)]).split(0).len(), 1);
    }

    #[test]
    fn commentable_lines_follow_target_ranges() {
        let files = vec![
            PullRequestFile {
                filename: "src/a.cpp".to_string(),
                patch: Some("@@ -1,3 +1,4 @@\n a\n+b\n c\n d\n@@ -40,2 +41 @@ ctx\n-x\n y\n".to_string()),
            },
            PullRequestFile {
                filename: "logo.png".to_string(),
                patch: None,
            },
        ];
        let commentable = CommentableLines::from_files(&files);

        assert!(commentable.contains("src/a.cpp", 1));
        assert!(commentable.contains("src/a.cpp", 4));
        assert!(!commentable.contains("src/a.cpp", 5));
        assert!(commentable.contains("src/a.cpp", 41));
        assert!(!commentable.contains("src/a.cpp", 42));
        assert!(!commentable.contains("logo.png", 1));
        assert!(!commentable.contains("src/b.cpp", 1));
    }

    #[test]
    fn oversized_ranges_saturate_instead_of_overflowing() {
        let mut commentable = CommentableLines::default();
        commentable.add_patch("x", &format!("@@ -1 +{},2 @@\n", usize::MAX));
        commentable.add_patch("y", &format!("@@ -1 +3,{} @@\n", usize::MAX));

        assert!(!commentable.contains("x", 1));
        assert!(commentable.contains("y", 3));
        assert!(commentable.contains("y", usize::MAX - 1));
    }

    #[test]
    fn unreadable_ranges_are_skipped() {
        let mut commentable = CommentableLines::default();
        let patch = "@@ -1 +99999999999999999999999,2 @@\n@@ -8 +8,2 @@\n";
        commentable.add_patch("x", patch);

        assert!(commentable.contains("x", 8));
        assert!(commentable.contains("x", 9));
        assert!(!commentable.contains("x", 10));
    }

    #[test]
    fn plan_drops_untouched_lines_and_posted_comments() {
        let files = vec![PullRequestFile {
            filename: "src/a.cpp".to_string(),
            patch: Some("@@ -10,5 +10,5 @@\n".to_string()),
        }];
        let posted = vec![PostedComment {
            path: "src/a.cpp".to_string(),
            line: Some(11),
            side: Some(Side::Right),
            body: "fix src/a.cpp:11".to_string(),
        }];
        let comments = vec![
            comment("src/a.cpp", 10),
            comment("src/a.cpp", 11),
            comment("src/a.cpp", 30),
            comment("src/b.cpp", 10),
        ];

        let reviews = plan_reviews(submission(comments), &files, &posted, 15);

        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].body, "Formatting issues (1/1)");
        assert_eq!(reviews[0].comments, vec![comment("src/a.cpp", 10)]);
    }

    #[test]
    fn posted_comments_parse_from_api_json() {
        let json = r#"[{"id": 7, "path": "src/a.cpp", "line": null, "side": "RIGHT", "body": "x"}]"#;
        let posted: Vec<PostedComment> = serde_json::from_str(json).unwrap();
        assert_eq!(posted[0].line, None);
        assert_eq!(posted[0].side, Some(Side::Right));
    }
}
