// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod auth;
mod loader;
mod schema;

pub use auth::{AuthRecord, AuthStore};
pub use loader::load;
pub use schema::*;
