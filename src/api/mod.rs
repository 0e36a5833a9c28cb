pub(crate) mod errors;
pub(crate) mod grades;
pub(crate) mod handlers;
pub(crate) mod progression;
pub(crate) mod router;
pub(crate) mod students;
