// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key and tag naming conventions for catalog entities.
//!
//! ```text
//! products:42                  entity_key("products", 42)
//! products:slug:red-shoes      slug_key("products", "red-shoes")
//! products:list:{sha256 hex}   list_key("products", &params)
//! products:42 (tag)            entity_tag("products", 42)
//! products:list (tag)          list_tag("products")
//! ```
//!
//! List keys hash a canonical JSON rendering of the query parameters. Object
//! fields are emitted in sorted order, so two queries with the same filters,
//! pagination and sort map to the same key whatever order they were built in.

use std::fmt::Display;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Key for a single entity by identity.
#[must_use]
pub fn entity_key(entity: &str, id: impl Display) -> String {
    format!("{entity}:{id}")
}

/// Key for a single entity by slug or alias.
#[must_use]
pub fn slug_key(entity: &str, slug: &str) -> String {
    format!("{entity}:slug:{slug}")
}

/// Key for a list query, derived from its parameters.
///
/// `params` is usually a struct or map of filters, pagination and sort.
pub fn list_key<P: Serialize + ?Sized>(entity: &str, params: &P) -> Result<String, serde_json::Error> {
    // Going through Value sorts object keys (BTreeMap-backed)
    let canonical = serde_json::to_vec(&serde_json::to_value(params)?)?;
    let digest = Sha256::digest(&canonical);
    Ok(format!("{entity}:list:{}", hex::encode(digest)))
}

/// Tag covering every cached view of one entity.
#[must_use]
pub fn entity_tag(entity: &str, id: impl Display) -> String {
    format!("{entity}:{id}")
}

/// Tag covering every cached list of an entity type.
#[must_use]
pub fn list_tag(entity: &str) -> String {
    format!("{entity}:list")
}
