pub mod code_review;
