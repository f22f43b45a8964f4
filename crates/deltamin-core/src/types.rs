use serde::{Deserialize, Serialize};

/// Classification of one oracle invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The target failure was reproduced.
    Fails,
    /// The target ran to normal completion.
    Passes,
    /// The invocation could not be completed (timeout or similar).
    Unresolved,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        self == Verdict::Fails
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fails => "fails",
            Verdict::Passes => "passes",
            Verdict::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinimizationResult {
    #[serde(with = "hex_bytes")]
    pub minimized: Vec<u8>,
    pub original_size: usize,
    pub minimized_size: usize,
    pub invocation_count: u64,
    pub unresolved_count: u64,
    pub complement_reductions: u64,
    pub subset_reductions: u64,
    pub granularity_increases: u64,
    pub cancelled_count: u64,
}

impl MinimizationResult {
    /// Fraction of the original input that was removed, in `[0, 1]`.
    pub fn reduction_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.minimized_size as f64 / self.original_size as f64
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(original_size: usize, minimized: &[u8]) -> MinimizationResult {
        MinimizationResult {
            minimized: minimized.to_vec(),
            original_size,
            minimized_size: minimized.len(),
            invocation_count: 0,
            unresolved_count: 0,
            complement_reductions: 0,
            subset_reductions: 0,
            granularity_increases: 0,
            cancelled_count: 0,
        }
    }

    #[test]
    fn reduction_ratio_handles_empty_original() {
        assert_eq!(result(0, b"").reduction_ratio(), 0.0);
        assert_eq!(result(4, b"cd").reduction_ratio(), 0.5);
        assert_eq!(result(4, b"").reduction_ratio(), 1.0);
    }

    #[test]
    fn only_fails_is_a_failure() {
        assert!(Verdict::Fails.is_failure());
        assert!(!Verdict::Passes.is_failure());
        assert!(!Verdict::Unresolved.is_failure());
    }
}
