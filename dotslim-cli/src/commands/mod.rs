pub mod common;
pub mod inspect;
pub mod trace;
pub mod trim;
