//! Converts AcoustID wire types into our domain candidates.

use super::dto;
use super::{LookupError, TrackCandidate};

/// Convert a lookup response into candidates, best score first.
pub fn to_candidates(response: dto::LookupResponse) -> Result<Vec<TrackCandidate>, LookupError> {
    if response.status != "ok" {
        return Err(LookupError::InvalidResponse(format!(
            "status: {}",
            response.status
        )));
    }

    let mut candidates: Vec<TrackCandidate> = Vec::new();
    for result in response.results {
        for recording in result.recordings {
            let artist = join_artists(&recording.artists);
            // Prefer a plain album release group over compilations etc.
            let album = recording
                .releasegroups
                .iter()
                .find(|rg| {
                    rg.release_type.as_deref() == Some("Album") && rg.secondary_types.is_empty()
                })
                .or_else(|| recording.releasegroups.first())
                .and_then(|rg| rg.title.clone());

            candidates.push(TrackCandidate {
                score: result.score,
                artist,
                title: recording.title,
                album,
                year: None,
                genre: None,
                label: None,
            });
        }
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(candidates)
}

fn join_artists(artists: &[dto::Artist]) -> Option<String> {
    if artists.is_empty() {
        return None;
    }
    Some(
        artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    )
}
