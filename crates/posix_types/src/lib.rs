#![no_std]

pub mod constants;
pub mod ctypes;
pub mod namei;
pub mod open;
pub mod poll;
pub mod result;
pub mod signal;
pub mod stat;
pub mod syscall_no;

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
