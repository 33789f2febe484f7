// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod client;
pub mod error;
pub mod mock;
pub(crate) mod wire;
mod types;
mod validate;

pub use client::ChatClient;
pub use error::{SequenceError, TransportError};
pub use mock::ScriptedTransport;
pub use types::*;
pub use validate::validate_sequence;
