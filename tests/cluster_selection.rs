use opinion_worker::config::ClusteringSettings;
use opinion_worker::pipeline::analysis::ClusteringCore;
use opinion_worker::pipeline::cluster_count::{
    CandidateOutcome, ClusterCountSelector, KSource, RejectionReason,
};
use opinion_worker::pipeline::embedding::{dot, l2_normalize};
use opinion_worker::pipeline::projection::Projector;
use opinion_worker::util::kmeans::KMeans;
use rstest::rstest;

fn unit(v: [f32; 3]) -> Vec<f32> {
    let mut v = v.to_vec();
    l2_normalize(&mut v);
    v
}

/// Four points around x, four around y, two around z.
fn ten_points() -> Vec<Vec<f32>> {
    vec![
        unit([1.0, 0.05, 0.0]),
        unit([1.0, -0.05, 0.02]),
        unit([1.0, 0.0, -0.04]),
        unit([1.0, 0.03, 0.03]),
        unit([0.04, 1.0, 0.0]),
        unit([-0.05, 1.0, 0.01]),
        unit([0.0, 1.0, -0.03]),
        unit([0.02, 1.0, 0.05]),
        unit([0.0, 0.02, 1.0]),
        unit([0.03, 0.0, 1.0]),
    ]
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("comment number {i} with enough text")).collect()
}

#[test]
fn selected_k_never_has_an_undersized_cluster() {
    let settings = ClusteringSettings::default();
    let data = ten_points();

    let selection = ClusterCountSelector::new(&settings).select(&data, None);

    assert!((2..=8).contains(&selection.k));
    let ks: Vec<usize> = selection.candidates.iter().map(|c| c.k).collect();
    assert_eq!(ks, (2..=8).collect::<Vec<_>>());

    for report in &selection.candidates {
        let sizes = KMeans::fit(&data, report.k, settings.max_iterations, settings.seed)
            .expect("fit")
            .cluster_sizes();
        let smallest = sizes.into_iter().min().unwrap_or(0);
        match &report.outcome {
            CandidateOutcome::Scored(_) => assert!(smallest >= settings.min_cluster_size),
            CandidateOutcome::Rejected(RejectionReason::UndersizedCluster {
                smallest: reported,
                required,
            }) => {
                assert_eq!(*reported, smallest);
                assert_eq!(*required, 3);
            }
            CandidateOutcome::Rejected(RejectionReason::Degenerate(_)) => {}
        }
    }

    if selection.source == KSource::Searched {
        let chosen = selection
            .candidates
            .iter()
            .find(|c| c.k == selection.k)
            .expect("chosen k was evaluated");
        assert!(matches!(chosen.outcome, CandidateOutcome::Scored(_)));
    }
}

#[test]
fn a_high_scoring_k_with_a_tiny_cluster_is_rejected() {
    let selection = ClusterCountSelector::new(&ClusteringSettings::default()).select(&ten_points(), None);

    // k >= 4 cannot keep three members in every cluster of ten points.
    for report in selection.candidates.iter().filter(|c| c.k >= 4) {
        assert!(matches!(
            report.outcome,
            CandidateOutcome::Rejected(RejectionReason::UndersizedCluster { .. })
        ));
    }
    assert!(selection.k <= 3);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
fn too_few_points_fall_back_to_k_min(#[case] n: usize) {
    let data: Vec<Vec<f32>> = ten_points().into_iter().take(n).collect();
    let selection = ClusterCountSelector::new(&ClusteringSettings::default()).select(&data, None);

    assert_eq!(selection.k, 2);
    assert_eq!(selection.source, KSource::EmptyRange);
    assert!(selection.candidates.is_empty());
}

#[test]
fn identical_points_project_without_rescaling() {
    let data = vec![unit([0.3, 0.4, 0.5]); 6];

    let coords = Projector::new(42).project(&data);

    assert_eq!(coords.len(), 6);
    for point in &coords {
        assert!(point[0].is_finite() && point[1].is_finite());
        assert_eq!(*point, coords[0]);
    }
}

#[test]
fn projection_of_spread_points_fills_unit_square() {
    let coords = Projector::new(42).project(&ten_points());

    for axis in 0..2 {
        let min = coords.iter().map(|c| c[axis]).fold(f32::INFINITY, f32::min);
        let max = coords.iter().map(|c| c[axis]).fold(f32::NEG_INFINITY, f32::max);
        assert!((min + 1.0).abs() < 1e-4);
        assert!((max - 1.0).abs() < 1e-4);
    }
}

#[test]
fn representatives_are_distinct_members() {
    let data = ten_points();
    let settings = ClusteringSettings {
        similarity_threshold: 0.999,
        ..ClusteringSettings::default()
    };

    let analysis = ClusteringCore::new(&settings)
        .analyze(&texts(data.len()), &data, None)
        .expect("analysis");

    for cluster in &analysis.clusters {
        let reps = &cluster.representative_indices;
        assert!(reps.len() <= settings.representative_top_k);
        assert!(reps.iter().all(|r| cluster.members.contains(r)));
        for (i, a) in reps.iter().enumerate() {
            for b in &reps[i + 1..] {
                assert_ne!(a, b);
                assert!(dot(&data[*a], &data[*b]) <= settings.similarity_threshold);
            }
        }
    }
}

#[test]
fn clustering_is_deterministic() {
    let data = ten_points();
    let core = ClusteringCore::new(&ClusteringSettings::default());

    let first = core.analyze(&texts(10), &data, None).expect("analysis");
    let second = core.analyze(&texts(10), &data, None).expect("analysis");

    assert_eq!(first.assignments, second.assignments);
    assert_eq!(first.coords, second.coords);
}
