use crate::test_helpers::sim_engine::SimRequest;

/// Factory to build simulated merge requests for testing
pub struct MergeRequestFactory {
    id: u64,
    segments: Option<Vec<String>>,
    estimated_bytes: u64,
}

impl MergeRequestFactory {
    pub fn new() -> Self {
        Self {
            id: 1,
            segments: None,
            estimated_bytes: 1024,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_segments(mut self, segments: &[&str]) -> Self {
        self.segments = Some(segments.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_estimated_bytes(mut self, bytes: u64) -> Self {
        self.estimated_bytes = bytes;
        self
    }

    /// Defaults to two segments named after the request id
    pub fn create(self) -> SimRequest {
        let segments = self.segments.unwrap_or_else(|| {
            vec![
                format!("segment-{:05}-a", self.id),
                format!("segment-{:05}-b", self.id),
            ]
        });
        SimRequest {
            id: self.id,
            segments,
            estimated_bytes: self.estimated_bytes,
        }
    }
}
