//! Workload generation: operation mix, bounds, and determinism.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::Statement;
    use crate::sampler::{GenerationError, Rectangle, RectangleSampler};
    use crate::workload::{Operation, WorkloadGenerator};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn generator(insert_probability: f64) -> WorkloadGenerator {
        let sampler = RectangleSampler::new(1000, 1000).unwrap();
        WorkloadGenerator::new(sampler, insert_probability, 1000).unwrap()
    }

    /// # Scenario
    /// Generate many operations with the default 50/50 mix.
    ///
    /// # Expected behavior
    /// Both kinds appear, every insert count is below the cap, and every
    /// rectangle is non-degenerate within the bounds.
    #[test]
    fn workload__mixed_operations_within_bounds() {
        let generator = generator(0.5);
        let mut rng = StdRng::seed_from_u64(11);
        let (mut inserts, mut deletes) = (0, 0);

        for _ in 0..2_000 {
            let op = generator.generate(&mut rng).unwrap();
            let rect = op.rect();
            assert!(rect.x1() < rect.x2() && rect.x2() < 1000);
            assert!(rect.y1() < rect.y2() && rect.y2() < 1000);
            match op {
                Operation::Insert {
                    point_count, seed, ..
                } => {
                    assert!(point_count < 1000);
                    assert!(seed >= 0);
                    inserts += 1;
                }
                Operation::Delete { .. } => deletes += 1,
            }
        }

        assert!(inserts > 800, "inserts = {inserts}");
        assert!(deletes > 800, "deletes = {deletes}");
    }

    /// # Scenario
    /// Probability 1 and probability 0.
    ///
    /// # Expected behavior
    /// Only inserts, then only deletes.
    #[test]
    fn workload__probability_extremes() {
        let mut rng = StdRng::seed_from_u64(3);

        let always = generator(1.0);
        assert!((0..200).all(|_| matches!(
            always.generate(&mut rng).unwrap(),
            Operation::Insert { .. }
        )));

        let never = generator(0.0);
        assert!((0..200).all(|_| matches!(
            never.generate(&mut rng).unwrap(),
            Operation::Delete { .. }
        )));
    }

    #[test]
    fn workload__same_seed_same_sequence() {
        let generator = generator(0.5);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            assert_eq!(
                generator.generate(&mut a).unwrap(),
                generator.generate(&mut b).unwrap()
            );
        }
    }

    #[test]
    fn workload__rejects_invalid_parameters() {
        let sampler = RectangleSampler::new(10, 10).unwrap();
        assert_eq!(
            WorkloadGenerator::new(sampler, 1.5, 10).unwrap_err(),
            GenerationError::Probability(1.5)
        );
        assert!(WorkloadGenerator::new(sampler, 0.5, 0).is_err());
    }

    #[test]
    fn operation__maps_to_statement() {
        let rect = Rectangle::new(1, 2, 3, 4).unwrap();
        let insert = Operation::Insert {
            rect,
            point_count: 7,
            seed: 42,
        };
        assert_eq!(
            insert.statement(),
            Statement::InsertPoints {
                rect,
                count: 7,
                seed: 42
            }
        );
        assert_eq!(
            Operation::Delete { rect }.statement(),
            Statement::DeleteWithin { rect }
        );
        assert_eq!(insert.to_string(), "insert 7 points into (1, 2, 3, 4)");
    }

    #[test]
    fn operation__json_shape() {
        let rect = Rectangle::new(1, 2, 3, 4).unwrap();
        let json = serde_json::to_value(Operation::Delete { rect }).unwrap();
        assert_eq!(json["kind"], "delete");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, Operation::Delete { rect });
    }
}
