pub mod cli;
pub mod io;
pub mod types;
