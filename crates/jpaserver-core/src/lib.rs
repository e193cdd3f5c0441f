pub mod encoding;
pub mod error;
pub mod id;
pub mod resource;
pub mod time;

pub use encoding::Encoding;
pub use error::{CoreError, ErrorCategory, Result};
pub use id::{IdType, generate_id, is_valid_id};
pub use resource::{resource_id_of, resource_type_of, stamp_meta};
pub use time::{DateRange, format_instant, now_utc};
