pub mod checkpoint;
pub mod layout;

pub use checkpoint::Checkpoint;
pub use layout::StorageLayout;
