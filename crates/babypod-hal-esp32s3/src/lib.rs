#![no_std]

//! ESP32-S3 board implementations of the `babypod-core` capability traits.

pub mod network;
pub mod rtc;
pub mod storage;
