pub mod alloc;
pub mod typedesc;
pub mod update;
pub mod value;

pub use alloc::BigmapAlloc;
pub use typedesc::{ContractScript, TypeDesc};
pub use update::BigmapUpdate;
pub use value::{key_id, BigmapValue};
