mod delivery;
mod license;

pub use delivery::*;
pub use license::*;
