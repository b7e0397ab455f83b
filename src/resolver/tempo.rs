//! Tempo disagreement reconciliation.
//!
//! Beat detectors commonly report half-time, double-time, or triplet
//! multiples of the true tempo. When two sources disagree by more than the
//! configured tolerance, we test whether one value is a simple multiple or
//! fraction of the other before treating them as genuinely different.

/// Ratios considered "the same tempo reported differently".
pub const TEMPO_RATIOS: [f64; 5] = [2.0, 0.5, 3.0, 1.5, 1.0 / 3.0];

/// Outcome of reconciling two related tempo values.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoResolution {
    /// The value selected as the underlying tempo.
    pub bpm: f64,
    /// Which of the two inputs was selected (0 = first, 1 = second).
    pub chosen: usize,
    /// Human-readable note recording the detected multiple.
    pub note: String,
}

/// Check whether two tempo values agree within `tolerance` (relative).
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    if a <= 0.0 || b <= 0.0 {
        return false;
    }
    (a - b).abs() / a.max(b) <= tolerance
}

/// Reconcile two disagreeing tempo values.
///
/// Returns `Some` when the values are related by one of [`TEMPO_RATIOS`],
/// selecting the value that lands inside the acceptable `band`. When both
/// candidates are in band the lower value wins: the detector multiples in
/// the ratio set all inflate the base tempo, so the lower reading is the
/// base. Returns `None` when the values are unrelated; the caller falls
/// back to ordinary source precedence.
pub fn reconcile(
    a: f64,
    b: f64,
    tolerance: f64,
    band_min: f64,
    band_max: f64,
) -> Option<TempoResolution> {
    if a <= 0.0 || b <= 0.0 || within_tolerance(a, b, tolerance) {
        return None;
    }

    if !TEMPO_RATIOS
        .iter()
        .any(|r| within_tolerance(a, b * r, tolerance))
    {
        return None;
    }

    let in_band = |v: f64| v >= band_min && v <= band_max;
    let chosen = match (in_band(a), in_band(b)) {
        (true, false) => 0,
        (false, true) => 1,
        // Both in band (or neither): the lower value is the base tempo.
        _ => {
            if a <= b {
                0
            } else {
                1
            }
        }
    };

    let bpm = if chosen == 0 { a } else { b };
    let other = if chosen == 0 { b } else { a };
    // Express the multiple relative to the chosen value.
    let multiple = other / bpm;
    let note = format!(
        "possible {}x tempo ({} also reported)",
        format_ratio(multiple),
        format_bpm(other)
    );

    Some(TempoResolution { bpm, chosen, note })
}

/// Format a BPM value, dropping a trailing `.0`.
pub fn format_bpm(bpm: f64) -> String {
    if (bpm - bpm.round()).abs() < 0.05 {
        format!("{}", bpm.round() as i64)
    } else {
        format!("{:.1}", bpm)
    }
}

fn format_ratio(r: f64) -> String {
    if (r - r.round()).abs() < 0.02 {
        format!("{}", r.round() as i64)
    } else {
        format!("{:.2}", r)
    }
}
