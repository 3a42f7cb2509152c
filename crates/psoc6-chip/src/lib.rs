//! Silicon model for the PSoC 6 dual-core CIFAR-10 target.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure description of the part of the silicon the classifier relies on:
//! the IPC pipe between the Cortex-M0+ and the Cortex-M4, the SysTick
//! down-counter used for profiling, and the fixed CIFAR-10 network geometry
//! that sizes every buffer on the M4.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ipc`] | Client ids, endpoint addresses, notification mask, packed message layout |
//! | [`systick`] | 24-bit reload, 8 MHz IMO tick period, rollover period |
//! | [`cifar10`] | Layer geometry, quantization shifts, input normalization, buffer sizing |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cifar10;
pub mod ipc;
pub mod systick;
