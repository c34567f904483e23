pub mod path;
pub mod recorder;
pub mod request;
pub mod response;
