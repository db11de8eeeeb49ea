//! Architecture constants of the x86 target

pub mod mmu;

pub use mmu::{boot_gdt, Gdt};
