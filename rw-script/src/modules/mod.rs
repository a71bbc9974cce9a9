pub mod game;
pub mod vm;

pub use game::game_module;
pub use vm::vm_module;
