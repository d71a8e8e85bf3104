pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::CpuRecognizer;
pub use stub::StubRecognizer;

#[cfg(feature = "backend-tract")]
pub use tract::TractRecognizer;
