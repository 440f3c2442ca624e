pub mod registry;

pub use registry::LocalRegistry;
