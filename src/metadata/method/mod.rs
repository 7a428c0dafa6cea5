//! Method bodies and the attribute flags that decide whether a method can be stubbed.

mod body;
mod types;

pub use body::{MethodBody, STUB_BODY};
pub use types::*;
