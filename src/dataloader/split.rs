use rand::seq::SliceRandom;
use rand::Rng;

use log::info;

use crate::err::{OsrError, OsrResult};

/// Disjoint training and validation indices drawn from one shuffled
/// permutation of `[0, n)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPartition {
    pub training: Vec<usize>,
    pub validation: Vec<usize>,
}

impl IndexPartition {
    /// The first `floor((1 - validation_ratio) * n)` shuffled indices go to training
    pub fn shuffled<R: Rng + ?Sized>(n: usize, validation_ratio: f32, rng: &mut R) -> OsrResult<Self> {
        if !(0.0..1.0).contains(&validation_ratio) {
            return Err(OsrError::InvalidSplitRatio(validation_ratio));
        }

        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(rng);

        // config ratios are f32, keep 0.3 from turning into 0.30000001
        let ratio = (validation_ratio as f64 * 1e6).round() / 1e6;
        let train_len = ((1.0 - ratio) * n as f64).floor() as usize;
        let validation = perm.split_off(train_len.min(n));

        info!("Split {} samples : {} training, {} validation", n, perm.len(), validation.len());

        Ok(Self {
            training: perm,
            validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let mut rng = StdRng::seed_from_u64(11);

        for (n, train_len) in [(0, 0), (1, 0), (7, 4), (10, 7), (33, 23), (100, 70)] {
            let p = IndexPartition::shuffled(n, 0.3, &mut rng).unwrap();

            let mut all: Vec<usize> = p.training.iter().chain(p.validation.iter()).cloned().collect();
            all.sort_unstable();

            assert_eq!(all, (0..n).collect::<Vec<_>>());
            assert_eq!(p.training.len(), train_len);
        }
    }

    #[test]
    fn test_partition_follows_rng() {
        let a = IndexPartition::shuffled(50, 0.3, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = IndexPartition::shuffled(50, 0.3, &mut StdRng::seed_from_u64(1)).unwrap();
        let c = IndexPartition::shuffled(50, 0.3, &mut StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_ratio() {
        let mut rng = StdRng::seed_from_u64(0);

        assert!(matches!(
            IndexPartition::shuffled(10, 1.0, &mut rng),
            Err(OsrError::InvalidSplitRatio(_))
        ));
        assert!(IndexPartition::shuffled(10, -0.1, &mut rng).is_err());
        assert!(IndexPartition::shuffled(10, f32::NAN, &mut rng).is_err());
        assert_eq!(IndexPartition::shuffled(10, 0.0, &mut rng).unwrap().validation.len(), 0);
    }
}
