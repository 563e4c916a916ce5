//! Rectangle construction and containment tests.

#[cfg(test)]
mod tests {
    use crate::sampler::{GenerationError, Rectangle};

    #[test]
    fn new_accepts_positive_area() {
        let rect = Rectangle::new(10, 10, 200, 200).unwrap();
        assert_eq!(
            (rect.x1(), rect.y1(), rect.x2(), rect.y2()),
            (10, 10, 200, 200)
        );
    }

    #[test]
    fn new_rejects_zero_width() {
        assert_eq!(
            Rectangle::new(5, 0, 5, 10).unwrap_err(),
            GenerationError::Degenerate {
                x1: 5,
                y1: 0,
                x2: 5,
                y2: 10
            }
        );
    }

    #[test]
    fn new_rejects_inverted_height() {
        assert!(Rectangle::new(0, 9, 10, 3).is_err());
    }

    /// # Scenario
    /// Boundary points are not contained, interior points are.
    ///
    /// # Expected behavior
    /// Mirrors `ST_Within(point, envelope)`: only strictly interior points match.
    #[test]
    fn contains_strictly_excludes_boundary() {
        let rect = Rectangle::new(0, 0, 50, 50).unwrap();
        assert!(rect.contains_strictly(25.0, 25.0));
        assert!(rect.contains_strictly(0.001, 49.999));
        assert!(!rect.contains_strictly(0.0, 25.0));
        assert!(!rect.contains_strictly(25.0, 50.0));
        assert!(!rect.contains_strictly(51.0, 25.0));
    }

    #[test]
    fn display_lists_corners() {
        let rect = Rectangle::new(1, 2, 3, 4).unwrap();
        assert_eq!(rect.to_string(), "(1, 2, 3, 4)");
    }

    #[test]
    fn deserialize_rejects_degenerate_rectangle() {
        let ok: Rectangle = serde_json::from_str(r#"{"x1":1,"y1":2,"x2":3,"y2":4}"#).unwrap();
        assert_eq!(ok, Rectangle::new(1, 2, 3, 4).unwrap());

        let bad = serde_json::from_str::<Rectangle>(r#"{"x1":3,"y1":2,"x2":3,"y2":4}"#);
        assert!(bad.is_err());
    }
}
