pub mod cli;
pub mod track;

pub use cli::*;
pub use track::*;
