//! Image registry
//!
//! The server side exposes a local image store over HTTP; the client side
//! pushes and pulls images to a registry server or, over scp, to a plain
//! directory on another host.

pub mod client;
pub mod remote;
pub mod scp;
pub mod server;
mod spool;

pub use client::{TransferClient, TransferReport};
pub use remote::RemoteAddress;
pub use scp::ScpTransport;
pub use server::{start, RegistryHandle, RegistryServer, ARCHIVE_CONTENT_TYPE, DIGEST_HEADER};
