pub mod admin;
pub mod certificate;
pub mod routes;

pub use admin::*;
pub use certificate::*;
pub use routes::*;
