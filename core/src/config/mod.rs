mod load;
mod types;

pub use load::{from_file, load, load_default, validate};
pub use types::*;
