//! Wire types for the AcoustID lookup response.
//!
//! These structs mirror the JSON shape of the external API. They never leak
//! past the adapter; everything downstream works with
//! [`super::TrackCandidate`].

use serde::Deserialize;

/// Top-level lookup response
#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<LookupResult>,
}

/// One fingerprint match
#[derive(Debug, Deserialize)]
pub struct LookupResult {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

/// A MusicBrainz recording attached to a match
#[derive(Debug, Deserialize)]
pub struct Recording {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseGroup {
    pub id: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub release_type: Option<String>,
    #[serde(default, rename = "secondarytypes")]
    pub secondary_types: Vec<String>,
}
