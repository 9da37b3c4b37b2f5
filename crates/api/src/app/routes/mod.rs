pub mod charges;
pub mod system;
