pub mod http;
pub mod range;
