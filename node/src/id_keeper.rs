use super::*;
use bpv7::Bundle;
use std::collections::HashMap;

/// Assigns increasing sequence numbers to locally originated bundles that
/// share a `(source, creation time)` prefix, so that bundles created within
/// the same timestamp granularity remain distinguishable.
#[derive(Default)]
pub struct IdKeeper {
    data: HashMap<String, u64>,
}

impl IdKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the bundle's sequence number in place.
    pub fn update(&mut self, bundle: &mut Bundle) {
        let primary = &mut bundle.primary_block;
        let key = format!(
            "{}-{}",
            primary.source,
            primary.creation_timestamp.dtn_time()
        );

        let sequence = match self.data.get_mut(&key) {
            Some(counter) => {
                *counter += 1;
                *counter
            }
            None => {
                self.data.insert(key, 0);
                0
            }
        };
        primary.creation_timestamp.set_sequence_number(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpv7::builder::Builder;
    use bpv7::{BlockControlFlags, BundleControlFlags};

    fn build_test_bundle() -> Bundle {
        let mut age_block = bpv7::CanonicalBlock::new_bundle_age_block(0);
        age_block.block_control_flags = BlockControlFlags::DELETE_BUNDLE;

        Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp_epoch()
            .lifetime("60s")
            .bundle_ctrl_flags(
                BundleControlFlags::MUST_NOT_FRAGMENT | BundleControlFlags::REQUEST_STATUS_TIME,
            )
            .canonical(age_block)
            .payload_block(b"hello world!".to_vec())
            .build()
            .expect("creating bundle failed")
    }

    #[test]
    fn test_sequence_numbers() {
        let mut bundle0 = build_test_bundle();
        let mut bundle1 = build_test_bundle();

        let mut keeper = IdKeeper::new();
        keeper.update(&mut bundle0);
        keeper.update(&mut bundle1);

        assert_eq!(bundle0.primary_block.creation_timestamp.sequence_number(), 0);
        assert_eq!(bundle1.primary_block.creation_timestamp.sequence_number(), 1);
    }

    #[test]
    fn test_distinct_sources_keep_independent_counters() {
        let mut keeper = IdKeeper::new();

        let mut bundle0 = build_test_bundle();
        keeper.update(&mut bundle0);

        let mut other = Builder::new()
            .source("dtn://elsewhere/")
            .destination("dtn://dest/")
            .creation_timestamp_epoch()
            .lifetime("60s")
            .bundle_age_block(0)
            .payload_block(b"hello world!".to_vec())
            .build()
            .unwrap();
        keeper.update(&mut other);

        assert_eq!(other.primary_block.creation_timestamp.sequence_number(), 0);
    }
}
