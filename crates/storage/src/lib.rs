pub mod backend;
mod body;
pub mod error;
mod key;
mod models;

pub use crate::backend::ObjectStore;
pub use crate::body::Body;
pub use crate::key::validate as validate_key;
pub use crate::models::{ObjectInfo, Page};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn ObjectStore + Send + Sync>;
