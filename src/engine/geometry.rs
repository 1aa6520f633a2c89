//! Envelope geometry for the in-memory engine.
//!
//! Parcels are modelled as sets of axis-aligned rectangles. Parts of one
//! feature are assumed not to overlap, so area and length are plain sums.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Envelope {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin: xmin.min(xmax),
            ymin: ymin.min(ymax),
            xmax: xmin.max(xmax),
            ymax: ymin.max(ymax),
        }
    }

    pub fn area(&self) -> f64 {
        (self.xmax - self.xmin) * (self.ymax - self.ymin)
    }

    pub fn perimeter(&self) -> f64 {
        2.0 * ((self.xmax - self.xmin) + (self.ymax - self.ymin))
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        self.xmin <= other.xmin && self.ymin <= other.ymin && self.xmax >= other.xmax && self.ymax >= other.ymax
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.xmin < other.xmax && other.xmin < self.xmax && self.ymin < other.ymax && other.ymin < self.ymax
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry {
    pub parts: Vec<Envelope>,
}

impl Geometry {
    pub fn rect(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            parts: vec![Envelope::new(xmin, ymin, xmax, ymax)],
        }
    }

    pub fn area(&self) -> f64 {
        self.parts.iter().map(Envelope::area).sum()
    }

    pub fn length(&self) -> f64 {
        self.parts.iter().map(Envelope::perimeter).sum()
    }

    /// Every part lies inside some part of `other`.
    pub fn within(&self, other: &Geometry) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| other.parts.iter().any(|o| o.contains(p)))
    }

    pub fn intersects(&self, other: &Geometry) -> bool {
        self.parts.iter().any(|p| other.parts.iter().any(|o| o.intersects(p)))
    }

    /// Multipart union: parts are collected, not merged.
    pub fn union<'a>(geometries: impl IntoIterator<Item = &'a Geometry>) -> Geometry {
        Geometry {
            parts: geometries.into_iter().flat_map(|g| g.parts.iter().copied()).collect(),
        }
    }

    /// Drop parts wholly contained in another part of this geometry whose
    /// area is below `percent` of that container.
    pub fn eliminate_contained_parts(&self, percent: f64) -> Geometry {
        let keep = |(i, part): &(usize, &Envelope)| {
            !self.parts.iter().enumerate().any(|(j, other)| {
                *i != j && other.contains(part) && other != *part && part.area() < other.area() * percent / 100.0
            })
        };
        Geometry {
            parts: self.parts.iter().enumerate().filter(keep).map(|(_, p)| *p).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measures_sum_over_parts() {
        let g = Geometry::union([&Geometry::rect(0.0, 0.0, 10.0, 10.0), &Geometry::rect(10.0, 0.0, 15.0, 10.0)]);
        assert_eq!(g.area(), 150.0);
        assert_eq!(g.length(), 40.0 + 30.0);
    }

    #[test]
    fn test_within() {
        let lot = Geometry::rect(0.0, 0.0, 100.0, 100.0);
        assert!(Geometry::rect(10.0, 10.0, 20.0, 20.0).within(&lot));
        assert!(!Geometry::rect(90.0, 90.0, 120.0, 120.0).within(&lot));
        assert!(Geometry::rect(90.0, 90.0, 120.0, 120.0).intersects(&lot));
    }

    #[test]
    fn test_eliminate_contained_parts() {
        let g = Geometry {
            parts: vec![Envelope::new(0.0, 0.0, 100.0, 100.0), Envelope::new(10.0, 10.0, 20.0, 20.0)],
        };
        let cleaned = g.eliminate_contained_parts(90.0);
        assert_eq!(cleaned.parts.len(), 1);
        assert_eq!(cleaned.area(), 10_000.0);
    }
}
