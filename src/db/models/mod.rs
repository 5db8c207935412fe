mod case;
mod deadline;
mod document;
mod note;
mod user;

pub use case::*;
pub use deadline::*;
pub use document::*;
pub use note::*;
pub use user::*;
