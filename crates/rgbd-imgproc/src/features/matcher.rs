use rayon::prelude::*;

use super::{euclidean_distance, hamming_distance, Descriptors, FeatureError};

/// A match between a query descriptor and its nearest train descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    /// Index into the query descriptors.
    pub query_idx: usize,
    /// Index into the train descriptors.
    pub train_idx: usize,
    /// Distance between the two descriptors under their metric.
    pub distance: f32,
}

/// Find the nearest train descriptor of every query descriptor by brute force.
///
/// Matching is one-directional: train descriptors may be matched by several
/// queries, and no mutual or ratio test is applied. On equal distances the
/// lowest train index wins.
///
/// # Errors
///
/// Returns [`FeatureError::MetricMismatch`] if the two sets use different metrics.
pub fn nearest_neighbors(
    query: &Descriptors,
    train: &Descriptors,
) -> Result<Vec<DescriptorMatch>, FeatureError> {
    if query.metric() != train.metric() {
        return Err(FeatureError::MetricMismatch(query.metric(), train.metric()));
    }
    if query.is_empty() || train.is_empty() {
        return Ok(Vec::new());
    }

    let best_of = |query_idx: usize, distances: &mut dyn Iterator<Item = f32>| {
        let mut best = DescriptorMatch {
            query_idx,
            train_idx: 0,
            distance: f32::INFINITY,
        };
        for (train_idx, distance) in distances.enumerate() {
            if distance < best.distance {
                best.train_idx = train_idx;
                best.distance = distance;
            }
        }
        best
    };

    let matches = match (query, train) {
        (Descriptors::Binary(q), Descriptors::Binary(t)) => q
            .par_iter()
            .enumerate()
            .map(|(i, qd)| best_of(i, &mut t.iter().map(|td| hamming_distance(qd, td) as f32)))
            .collect(),
        (Descriptors::Float { .. }, Descriptors::Float { .. }) => (0..query.len())
            .into_par_iter()
            .filter_map(|i| {
                let qd = query.float_row(i)?;
                let mut distances =
                    (0..train.len()).filter_map(|j| train.float_row(j).map(|td| euclidean_distance(qd, td)));
                Some(best_of(i, &mut distances))
            })
            .collect(),
        _ => return Err(FeatureError::MetricMismatch(query.metric(), train.metric())),
    };

    Ok(matches)
}

/// Nearest neighbour matching followed by a fixed distance cutoff.
///
/// Matches whose distance is greater than or equal to `max_distance` are dropped.
///
/// # Errors
///
/// Returns [`FeatureError::MetricMismatch`] if the two sets use different metrics.
pub fn match_nearest(
    query: &Descriptors,
    train: &Descriptors,
    max_distance: f32,
) -> Result<Vec<DescriptorMatch>, FeatureError> {
    Ok(nearest_neighbors(query, train)?
        .into_iter()
        .filter(|m| m.distance < max_distance)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DistanceMetric;

    fn binary(bits: &[u8]) -> [u8; 32] {
        let mut d = [0u8; 32];
        d[0] = bits[0];
        d
    }

    #[test]
    fn test_nearest_neighbors_binary() -> Result<(), FeatureError> {
        let train = Descriptors::Binary(vec![binary(&[0b0000]), binary(&[0b1111])]);
        let query = Descriptors::Binary(vec![binary(&[0b0111]), binary(&[0b0001])]);

        let matches = nearest_neighbors(&query, &train)?;
        assert_eq!(
            matches,
            vec![
                DescriptorMatch {
                    query_idx: 0,
                    train_idx: 1,
                    distance: 1.0
                },
                DescriptorMatch {
                    query_idx: 1,
                    train_idx: 0,
                    distance: 1.0
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_match_nearest_cutoff() -> Result<(), FeatureError> {
        let train = Descriptors::Binary(vec![binary(&[0b0000])]);
        let query = Descriptors::Binary(vec![binary(&[0b0011]), binary(&[0b0111])]);

        // distance 3 is rejected at a cutoff of 3: only strictly smaller distances pass
        let matches = match_nearest(&query, &train, 3.0)?;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].query_idx, 0);
        assert_eq!(matches[0].distance, 2.0);
        Ok(())
    }

    #[test]
    fn test_many_to_one_and_ties() -> Result<(), FeatureError> {
        let train = Descriptors::Binary(vec![binary(&[0b0001]), binary(&[0b0010])]);
        let query = Descriptors::Binary(vec![binary(&[0b0000]), binary(&[0b0000])]);
        let matches = nearest_neighbors(&query, &train)?;
        assert!(matches.iter().all(|m| m.train_idx == 0));
        Ok(())
    }

    #[test]
    fn test_nearest_neighbors_float() -> Result<(), FeatureError> {
        let train = Descriptors::Float {
            dim: 2,
            data: vec![0.0, 0.0, 1.0, 1.0],
        };
        let query = Descriptors::Float {
            dim: 2,
            data: vec![0.9, 0.8],
        };
        let matches = match_nearest(&query, &train, 0.5)?;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].train_idx, 1);
        Ok(())
    }

    #[test]
    fn test_metric_mismatch() {
        let train = Descriptors::Binary(vec![[0u8; 32]]);
        let query = Descriptors::Float {
            dim: 1,
            data: vec![0.0],
        };
        match nearest_neighbors(&query, &train) {
            Err(FeatureError::MetricMismatch(a, b)) => {
                assert_eq!(a, DistanceMetric::Euclidean);
                assert_eq!(b, DistanceMetric::Hamming);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_empty_sets() -> Result<(), FeatureError> {
        let train = Descriptors::Binary(vec![]);
        let query = Descriptors::Binary(vec![[0u8; 32]]);
        assert!(nearest_neighbors(&query, &train)?.is_empty());
        Ok(())
    }
}
