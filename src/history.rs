use std::collections::HashMap;

/// Centroids observed for each track id, in frame order. Entries live for
/// the whole run.
#[derive(Debug, Default)]
pub struct TrackHistory {
    trails: HashMap<u32, Vec<(f32, f32)>>,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, track_id: u32, centroid: (f32, f32)) {
        self.trails.entry(track_id).or_default().push(centroid);
    }

    pub fn trail(&self, track_id: u32) -> &[(f32, f32)] {
        self.trails
            .get(&track_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of distinct track ids seen.
    pub fn len(&self) -> usize {
        self.trails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }

    pub fn total_points(&self) -> usize {
        self.trails.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_in_order() {
        let mut history = TrackHistory::new();
        history.record(4, (1.0, 2.0));
        history.record(9, (5.0, 5.0));
        history.record(4, (3.0, 4.0));

        assert_eq!(history.trail(4), &[(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(history.trail(9), &[(5.0, 5.0)]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.total_points(), 3);
    }

    #[test]
    fn unknown_id_has_empty_trail() {
        let history = TrackHistory::new();
        assert!(history.is_empty());
        assert!(history.trail(1).is_empty());
    }
}
