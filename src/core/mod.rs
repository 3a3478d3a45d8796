pub mod diff_parser;
pub mod files;
pub mod git;
pub mod paths;
pub mod review;
pub mod submission;

pub use diff_parser::{Hunk, Line, LineKind, ParseError, Patch, PatchSet};
pub use files::{collect_source_files, FilesError};
pub use git::GitIntegration;
pub use review::{diff_to_review, DiffReviewBuilder, ReviewComment, ReviewPayload, Side};
pub use submission::{
    plan_reviews, CommentableLines, PostedComment, PullRequestFile, ReviewEvent, ReviewSubmission,
};
