mod correlation;
mod history;
mod reading;
mod result;
mod status;
mod telemetry_store;

pub use correlation::*;
pub use history::*;
pub use reading::*;
pub use result::*;
pub use status::*;
pub use telemetry_store::*;
