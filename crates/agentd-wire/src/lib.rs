//! # agentd-wire
//!
//! Pure-logic wire layer for the agentd process family.
//!
//! Everything that can be specified as bytes-in/bytes-out lives here: the
//! typed packet model, the capability bitset, the status-code envelope, and
//! the request/response codecs for every service API. No I/O, no syscalls;
//! the OS boundary is `agentd-ipc`.

#![deny(unsafe_code)]

pub mod authservice;
pub mod bitcap;
pub mod canonization;
pub mod dataservice;
pub mod inet;
pub mod mem;
pub mod packet;
pub mod protocol;
pub mod randomservice;
pub mod status;
