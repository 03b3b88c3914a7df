//! # agentd
//!
//! A blockchain node agent structured as a supervised family of
//! privilege-separated processes. The root supervisor forks one child per
//! service — data store, randomness, canonization, protocol frontend,
//! listener, authentication — each demoted to an unprivileged identity
//! inside a restricted filesystem view, wired together over local socket
//! pairs carrying the framed transport from `agentd-ipc`.

pub mod bootstrap;
pub mod commandline;
pub mod config;
pub mod dataservice;
pub mod fds;
pub mod logging;
pub mod path;
pub mod privsep;
pub mod process;
pub mod services;
pub mod strings;
pub mod supervisor;
