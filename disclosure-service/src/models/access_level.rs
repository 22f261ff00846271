//! Disclosure tiers.

use serde::{Deserialize, Serialize};

/// How much of a project a viewer may see.
///
/// Variants are ordered from least to most privileged, so `max`/`>=`
/// comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Registered,
    Negotiator,
}

string_enum!(AccessLevel, "access level", {
    Public => "public",
    Registered => "registered",
    Negotiator => "negotiator",
});

impl AccessLevel {
    /// The level every failure or ambiguity resolves to.
    pub const LEAST_PRIVILEGED: AccessLevel = AccessLevel::Public;
}
