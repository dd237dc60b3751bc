//! Rollback state storage
//!
//! Provides the serialized state blob kept in rollback history and sent in
//! snapshots.

mod snapshot;

pub use snapshot::StateBlob;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_blob_empty() {
        let blob = StateBlob::default();
        assert!(blob.is_empty());
        assert_eq!(blob.len(), 0);
        assert!(blob.verify());
    }

    #[test]
    fn test_state_blob_checksum_deterministic() {
        let data = vec![1, 2, 3, 4, 5];
        let a = StateBlob::new(data.clone());
        let b = StateBlob::new(data);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a, b);
    }

    #[test]
    fn test_state_blob_checksum_different_data() {
        let a = StateBlob::new(vec![1, 2, 3]);
        let b = StateBlob::new(vec![4, 5, 6]);
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_state_blob_detects_corruption() {
        let mut blob = StateBlob::new(vec![9; 64]);
        assert!(blob.verify());
        blob.data[10] ^= 0xFF;
        assert!(!blob.verify());
    }
}
