pub mod assets;
pub mod key;

pub use assets::*;
pub use key::*;
