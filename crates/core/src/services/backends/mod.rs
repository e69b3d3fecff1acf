pub mod sbpf;

#[cfg(feature = "capstone-backend")]
pub mod capstone;

#[cfg(feature = "capstone-backend")]
pub use capstone::CapstoneBackend;
pub use sbpf::SbpfBackend;
