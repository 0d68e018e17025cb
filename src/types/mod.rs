mod ids;
pub use ids::*;

mod secrets;
pub use secrets::*;
