//! Integration Tests for Feature Encoding
//!
//! Encoder, rate tracker, vector and normalizer working together.

#[cfg(test)]
mod integration_tests {
    use crate::constants::UNSEEN_CATEGORY;
    use crate::logic::features::{
        layout::{log_scaled_indices, FEATURE_COUNT},
        EncoderSet, FeatureVector, RangeNormalizer, RateDeltaTracker,
    };
    use crate::logic::flow::FlowRecord;

    fn flows() -> Vec<FlowRecord> {
        vec![
            FlowRecord::new("10.0.0.2", "10.0.0.1", 50000, 443, "TCP")
                .with_counts(10, 4000)
                .with_rates(5.0, 2000.0)
                .with_duration(2.0),
            FlowRecord::new("10.0.0.3", "10.0.0.1", 50001, 53, "UDP")
                .with_counts(2, 120)
                .with_rates(1.0, 60.0)
                .with_duration(2.0),
        ]
    }

    fn encoders(flows: &[FlowRecord]) -> EncoderSet {
        EncoderSet::fit(flows, |f, column| match column {
            "src_ip" => f.src_ip.as_str(),
            "dst_ip" => f.dst_ip.as_str(),
            _ => f.proto.as_str(),
        })
    }

    #[test]
    fn test_vector_columns_in_layout_order() {
        let flows = flows();
        let encoders = encoders(&flows);
        let tracker = RateDeltaTracker::new(64);

        let deltas = tracker.observe_flow(&flows[0]);
        let v = FeatureVector::from_flow(&flows[0], &encoders, &deltas);

        assert_eq!(
            v.values,
            [0.0, 0.0, 50000.0, 443.0, 0.0, 10.0, 4000.0, 2.0, 5.0, 2000.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_unseen_categories_flow_through_as_sentinel() {
        let encoders = encoders(&flows());
        let stranger = FlowRecord::new("192.168.9.9", "10.0.0.1", 1, 2, "ICMP");
        let v = FeatureVector::from_flow(&stranger, &encoders, &Default::default());

        assert_eq!(v.get_by_name("src_ip"), Some(UNSEEN_CATEGORY as f64));
        assert_eq!(v.get_by_name("dst_ip"), Some(0.0));
        assert_eq!(v.get_by_name("proto"), Some(UNSEEN_CATEGORY as f64));
    }

    #[test]
    fn test_deltas_reach_vector_on_repeat_sighting() {
        let flows = flows();
        let encoders = encoders(&flows);
        let tracker = RateDeltaTracker::new(64);

        let first = FlowRecord::new("10.0.0.2", "10.0.0.1", 5000, 80, "TCP").with_counts(1, 40);
        let d1 = tracker.observe_flow(&first);
        let v1 = FeatureVector::from_flow(&first, &encoders, &d1);
        assert_eq!(v1.get_by_name("pps_delta"), Some(0.0));
        assert_eq!(v1.get_by_name("bps_cum_increase"), Some(0.0));

        let again = first.clone().with_rates(100.0, 0.0);
        let d2 = tracker.observe_flow(&again);
        let v2 = FeatureVector::from_flow(&again, &encoders, &d2);
        assert_eq!(v2.get_by_name("pps_delta"), Some(100.0));
        assert_eq!(v2.get_by_name("pps_cum_increase"), Some(100.0));
    }

    #[test]
    fn test_normalizer_over_encoded_vectors() {
        let flows = flows();
        let encoders = encoders(&flows);
        let tracker = RateDeltaTracker::new(64);

        let rows: Vec<FeatureVector> = flows
            .iter()
            .map(|f| FeatureVector::from_flow(f, &encoders, &tracker.observe_flow(f)))
            .collect();

        let norm = RangeNormalizer::fit(&rows, &log_scaled_indices()).unwrap();
        assert_eq!(norm.dim(), FEATURE_COUNT);

        for row in &rows {
            let scaled = norm.transform(row.as_slice()).unwrap();
            assert!(scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
