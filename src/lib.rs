//! Physical frame allocation, user address spaces, and TLB miss resolution
//! for a small single-core kernel.
//!
//! The subsystem owns three pieces of state: a physical memory region
//! ([`memory::ram::Ram`]), a frame allocator that starts in a one-way
//! early-boot mode and is re-seated over a used-bitmap plus run-length table
//! at [`memory::Vm::bootstrap`], and a fixed-slot translation cache with
//! random replacement. Address spaces describe up to two loadable segments
//! and a fixed-size user stack, each backed by one physical frame per page.
//!
//! Hardware state is modeled in-crate so the whole subsystem can be driven
//! from host tests; the embedding kernel supplies the trap entry, the
//! program loader, and a `log` sink.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod constants;
pub mod memory;
