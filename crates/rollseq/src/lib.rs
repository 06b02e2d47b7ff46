#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod backoff;
mod config;
mod error;
mod futures;
mod identifier;
mod scope;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::backoff::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::futures::*;
pub use crate::identifier::*;
pub use crate::scope::*;
pub use crate::store::*;
pub use crate::time::*;
