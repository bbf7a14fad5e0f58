pub mod input;
pub mod write_loop;
