mod deadline;

pub use deadline::{Deadline, DeadlineExpired};
