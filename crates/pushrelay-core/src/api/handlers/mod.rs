pub(crate) mod notify;
pub(crate) mod token;
