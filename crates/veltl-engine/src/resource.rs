// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::time::SystemTime;

use crate::error::Error;

/// Loaded template content plus its modification stamp.
pub struct LoadedResource {
    pub content: String,
    pub last_modified: Option<SystemTime>,
}

/// Source of named sub-templates for `#parse` and `#include`.
///
/// The engine performs no filesystem access itself; hosts inject a loader
/// backed by whatever storage they use. Without one, both directives are
/// no-ops. Loading is synchronous like the rest of the engine.
pub trait ResourceLoader {
    fn exists(&self, name: &str) -> bool;
    fn load(&self, name: &str, encoding: &str) -> Result<LoadedResource, Error>;
}
