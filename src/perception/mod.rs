pub mod box_validator;
pub mod coords;
pub mod hierarchy;
pub mod pipeline;
pub mod preprocess;
pub mod response_parser;
pub mod types;
