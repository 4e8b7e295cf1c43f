//! Artifact shipping to deploy targets.
//!
//! The [`ArtifactShipper`] drives a [`Transport`]: it opens a session,
//! uploads to a temporary name, verifies size and SHA-256, then renames the
//! upload into place.

mod checksum;
mod local;
mod shipper;
mod ssh;
mod transport;

pub use checksum::sha256_file;
pub use local::LocalTransport;
pub use shipper::{ArtifactShipper, ShipmentReceipt, PARTIAL_SUFFIX};
pub use ssh::{SshTransport, CONNECT_TIMEOUT_SECS};
pub use transport::{RemoteFile, Transport, TransportSession};

#[cfg(test)]
pub use transport::{MockTransport, MockTransportSession};
