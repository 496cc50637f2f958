mod analytics_service;
mod correlation_service;
mod efficiency;
mod ingestion_service;
mod status_service;
mod timeout;
mod window;

pub use analytics_service::*;
pub use correlation_service::*;
pub use efficiency::*;
pub use ingestion_service::*;
pub use status_service::*;
pub use timeout::*;
pub use window::*;
