//! Outbound `ActivityPub` federation for herald.
//!
//! - **Rendering**: activities become `ActivityStreams` JSON
//! - **Signing**: draft-cavage HTTP Signatures over
//!   `(request-target) host date digest`
//! - **Delivery**: signed inbox push with status classification into a
//!   [`DeliveryOutcome`](herald_common::DeliveryOutcome)

pub mod client;
pub mod render;
pub mod signer;

pub use client::ApClient;
pub use render::ActivityRenderer;
pub use signer::HttpSigner;
