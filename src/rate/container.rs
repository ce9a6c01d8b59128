//! Rating containers: manually rated curves for training-set generation.
//!
//! A container is an append-only JSON file keyed by sample group. Each
//! group holds the raw curve record, the preprocessing recipe, fitted
//! parameters and the manual rating fields (integer rating 0-10 or -1,
//! free-text comment, rater identity, timestamp). Groups may carry empty
//! values where data is unavailable; consumers skip what they cannot use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FdError;
use crate::io::curve::CurveRecord;
use crate::model::ParamSet;

/// One manually rated sample group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingGroup {
    pub name: String,
    #[serde(default)]
    pub curve: Option<CurveRecord>,
    #[serde(default)]
    pub preprocessing: Vec<String>,
    #[serde(default)]
    pub params_fitted: Option<ParamSet>,
    /// Manual rating: 0-10, or -1 for invalid.
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
    /// Rater identity.
    #[serde(default)]
    pub user: String,
    /// RFC 3339 timestamp set by the collector.
    #[serde(default)]
    pub timestamp: String,
}

/// An append-only collection of rated sample groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingContainer {
    pub groups: Vec<RatingGroup>,
}

impl RatingContainer {
    pub fn load(path: &Path) -> Result<RatingContainer, FdError> {
        let text = fs::read_to_string(path).map_err(|e| FdError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| FdError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), FdError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| FdError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| FdError::io(path, e))
    }

    /// Append a group (the container never rewrites existing groups).
    pub fn append(&mut self, group: RatingGroup) {
        self.groups.push(group);
    }

    /// Groups that carry both curve data and a usable manual rating.
    ///
    /// Groups rated -1 (invalid) are skipped: they carry no quality signal a
    /// regressor could learn from.
    pub fn rated_groups(&self) -> impl Iterator<Item = &RatingGroup> {
        self.groups
            .iter()
            .filter(|g| g.curve.is_some() && (0..=10).contains(&g.rating))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_and_filtering() {
        let mut container = RatingContainer::default();
        container.append(RatingGroup {
            name: "spot1".to_string(),
            curve: Some(CurveRecord {
                height: vec![0.0, 1.0],
                force: vec![0.0, 0.5],
                segment: Some(vec![0, 0]),
                spring_constant: Some(0.05),
            }),
            preprocessing: vec!["compute_tip_position".to_string()],
            params_fitted: None,
            rating: 7,
            comment: "nice curve".to_string(),
            user: "alex".to_string(),
            timestamp: "2024-05-02T10:00:00Z".to_string(),
        });
        // A group without curve data (e.g. rating collected, data lost).
        container.append(RatingGroup {
            name: "spot2".to_string(),
            curve: None,
            preprocessing: Vec::new(),
            params_fitted: None,
            rating: 3,
            comment: String::new(),
            user: String::new(),
            timestamp: String::new(),
        });
        // A group the rater marked invalid; kept in the container, skipped
        // for training.
        container.append(RatingGroup {
            name: "spot3".to_string(),
            curve: Some(CurveRecord {
                height: vec![0.0, 1.0],
                force: vec![0.0, 0.5],
                segment: Some(vec![0, 0]),
                spring_constant: None,
            }),
            preprocessing: Vec::new(),
            params_fitted: None,
            rating: -1,
            comment: "drifted baseline".to_string(),
            user: "alex".to_string(),
            timestamp: "2024-05-02T10:05:00Z".to_string(),
        });

        let dir = std::env::temp_dir().join("fd-curves-test-container");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ratings.json");
        container.save(&path).unwrap();

        let loaded = RatingContainer::load(&path).unwrap();
        assert_eq!(loaded.groups.len(), 3);
        assert_eq!(loaded.rated_groups().count(), 1);
        assert_eq!(loaded.groups[0].rating, 7);
    }
}
