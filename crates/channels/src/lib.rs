//! Channel layer.
//!
//! Every transport (telephony voice, SMS, chat platform, mobile app, other
//! tooling) is described by a row in the [`profile`] table and has a
//! normalizer that turns its wire payload into a canonical [`Request`].
//! Telephony replies are rendered as provider markup by [`markup`].

pub mod error;
pub mod markup;
pub mod normalize;
pub mod profile;
pub mod request;

pub use {
    error::{Error, Result},
    profile::{AuthRule, ChannelProfile},
    request::{ChannelMetadata, Request},
};
