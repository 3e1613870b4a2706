pub mod numbers;
mod state;

pub use numbers::*;
pub use state::CsrFile;
