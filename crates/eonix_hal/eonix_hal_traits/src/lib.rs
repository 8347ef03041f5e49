#![no_std]
#![feature(doc_notable_trait)]

pub mod context;
pub mod fault;
pub mod fpu;
pub mod trap;
