pub mod dates;
pub mod error;
pub mod hash;
pub mod jwt;
pub mod scheduled_executor;

pub use dates::{SearchWindow, format_pub_date, parse_flexible_date};
pub use error::{ApiError, ApiResult};
pub use hash::{canonical_json, fingerprint};
pub use jwt::JwtUtil;
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
