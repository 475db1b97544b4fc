//! Deterministic model identity.
//!
//! A model's id is a name-based (v5, SHA-1) UUID of its repository location
//! under a fixed namespace. The same location always yields the same id, in
//! any process, with no state to persist.

use uuid::Uuid;

/// Namespace for repository location ids.
pub const MODEL_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_4b3d_5e7f_9a01_c2d3_e4f5_0617);

/// Maps repository locations to stable ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelIdentity;

impl ModelIdentity {
    pub fn new() -> Self {
        Self
    }

    /// Id for `location`. Surrounding whitespace is ignored; case is not.
    pub fn generate_id(&self, location: &str) -> Uuid {
        Uuid::new_v5(&MODEL_NAMESPACE, location.trim().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_location_same_id_across_instances() {
        let ids: Vec<Uuid> = (0..5)
            .map(|_| ModelIdentity::new().generate_id("TheBloke/Llama-2-7B-GGUF"))
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(ids[0].get_version_num(), 5);
    }

    #[test]
    fn test_distinct_locations_distinct_ids() {
        let identity = ModelIdentity::new();
        let corpus = [
            "apple/coreml-stable-diffusion-v1-5",
            "mlx-community/Llama-3.2-1B-Instruct-4bit",
            "TheBloke/Llama-2-7B-GGUF",
            "thebloke/llama-2-7b-gguf",
            "a/b",
            "a/c",
        ];
        let mut ids: Vec<Uuid> = corpus.iter().map(|l| identity.generate_id(l)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), corpus.len());
    }

    #[test]
    fn test_id_is_stable_value() {
        let identity = ModelIdentity::new();
        let expected = Uuid::new_v5(&MODEL_NAMESPACE, b"org/model");
        assert_eq!(identity.generate_id("org/model"), expected);
        assert_eq!(identity.generate_id("  org/model\n"), expected);
    }
}
