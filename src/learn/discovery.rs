//! Pattern discovery by density clustering of experience outcomes.
//!
//! Experiences embed as `[feedback score, hour-of-day/24, kind-ordinal/K]`.
//! Dense clusters whose mean feedback sits far from neutral become `cluster`
//! patterns: consistently great (or consistently bad) outcomes under similar
//! circumstances are exactly what the rest of the system should know about.

use chrono::Timelike;

use crate::types::{Experience, ExperienceKind, Pattern, PatternKind, PatternPayload};

/// Density neighborhood radius.
const EPS: f64 = 0.2;
/// Core-point minimum neighborhood size.
const MIN_SAMPLES: usize = 3;
/// Minimum experiences before clustering is attempted.
const MIN_EXPERIENCES: usize = 10;
/// Mean feedback must be at least this far (scaled x2) from neutral.
const INTEREST_THRESHOLD: f64 = 0.4;
/// Experience ids carried on an emitted pattern.
const IDS_PER_PATTERN: usize = 5;

/// Cluster the buffer and emit interesting clusters as patterns.
pub fn discover_patterns(experiences: &[Experience]) -> Vec<Pattern> {
    let scored: Vec<&Experience> = experiences
        .iter()
        .filter(|e| e.feedback_score.is_some())
        .collect();
    if scored.len() < MIN_EXPERIENCES {
        return Vec::new();
    }

    let features: Vec<[f64; 3]> = scored
        .iter()
        .map(|e| {
            [
                e.feedback_score.unwrap_or(0.5),
                f64::from(e.timestamp.hour()) / 24.0,
                e.kind.ordinal() as f64 / ExperienceKind::COUNT as f64,
            ]
        })
        .collect();

    let labels = dbscan(&features, EPS, MIN_SAMPLES);
    let cluster_count = labels.iter().flatten().max().map_or(0, |m| m + 1);

    let mut patterns = Vec::new();
    for label in 0..cluster_count {
        let members: Vec<&Experience> = labels
            .iter()
            .zip(&scored)
            .filter(|(l, _)| *l == &Some(label))
            .map(|(_, e)| *e)
            .collect();
        if members.len() < MIN_SAMPLES {
            continue;
        }

        let mean_feedback = members
            .iter()
            .filter_map(|e| e.feedback_score)
            .sum::<f64>()
            / members.len() as f64;
        let interest = (mean_feedback - 0.5).abs() * 2.0;
        if interest <= INTEREST_THRESHOLD {
            continue;
        }

        let start = members
            .iter()
            .map(|e| e.timestamp.timestamp() as f64)
            .fold(f64::INFINITY, f64::min);
        let end = members
            .iter()
            .map(|e| e.timestamp.timestamp() as f64)
            .fold(f64::NEG_INFINITY, f64::max);

        patterns.push(Pattern {
            kind: PatternKind::Cluster,
            sensor_ids: members
                .iter()
                .take(IDS_PER_PATTERN)
                .map(|e| e.id.clone())
                .collect(),
            confidence: interest,
            start_time: start,
            end_time: end,
            payload: PatternPayload::Cluster {
                label,
                size: members.len(),
                average_feedback: mean_feedback,
            },
        });
    }
    patterns
}

/// Classic DBSCAN over small point sets; `None` marks noise.
fn dbscan(points: &[[f64; 3]], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_label = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = region_query(points, i, eps);
        if neighbors.len() < min_samples {
            continue; // noise unless later absorbed by a cluster
        }

        let label = next_label;
        next_label += 1;
        labels[i] = Some(label);

        let mut frontier = neighbors;
        while let Some(j) = frontier.pop() {
            if !visited[j] {
                visited[j] = true;
                let j_neighbors = region_query(points, j, eps);
                if j_neighbors.len() >= min_samples {
                    frontier.extend(j_neighbors);
                }
            }
            if labels[j].is_none() {
                labels[j] = Some(label);
            }
        }
    }
    labels
}

fn region_query(points: &[[f64; 3]], center: usize, eps: f64) -> Vec<usize> {
    let c = points[center];
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            let d2 = (p[0] - c[0]).powi(2) + (p[1] - c[1]).powi(2) + (p[2] - c[2]).powi(2);
            d2.sqrt() <= eps
        })
        .map(|(i, _)| i)
        .collect()
}
