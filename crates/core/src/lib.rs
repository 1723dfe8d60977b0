pub mod events;
pub mod format;
pub mod models;
pub mod traits;

pub use events::*;
pub use models::*;
pub use traits::*;
