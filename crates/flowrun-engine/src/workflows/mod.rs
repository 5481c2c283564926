pub mod code_review;

pub use code_review::{
    create_code_review_workflow, review_on, review_on_async, run_code_review,
    run_code_review_async, run_code_review_with, ReviewOutcome,
};
