//! Great-circle distance and location label resolution.

use std::collections::BTreeMap;

use gamegrid_state::{GeoPoint, Node};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points in kilometres.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Maps location labels (e.g. `eu-west`) to coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationTable {
    points: BTreeMap<String, GeoPoint>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, point: GeoPoint) {
        self.points.insert(label.into(), point);
    }

    pub fn resolve(&self, label: &str) -> Option<GeoPoint> {
        self.points.get(label).copied()
    }

    /// A node's explicit coordinates, else its resolved location label.
    pub fn locate(&self, node: &Node) -> Option<GeoPoint> {
        node.coordinates.or_else(|| self.resolve(&node.location))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<(String, GeoPoint)> for LocationTable {
    fn from_iter<I: IntoIterator<Item = (String, GeoPoint)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRANKFURT: GeoPoint = GeoPoint { lat: 50.11, lon: 8.68 };
    const LONDON: GeoPoint = GeoPoint { lat: 51.51, lon: -0.13 };
    const NEW_YORK: GeoPoint = GeoPoint { lat: 40.71, lon: -74.01 };

    #[test]
    fn same_point_is_zero_distance() {
        assert!(haversine_km(&FRANKFURT, &FRANKFURT).abs() < 1e-9);
    }

    #[test]
    fn known_distances() {
        let fra_lon = haversine_km(&FRANKFURT, &LONDON);
        assert!((630.0..660.0).contains(&fra_lon), "got {fra_lon}");

        let lon_nyc = haversine_km(&LONDON, &NEW_YORK);
        assert!((5550.0..5600.0).contains(&lon_nyc), "got {lon_nyc}");
        assert!((haversine_km(&NEW_YORK, &LONDON) - lon_nyc).abs() < 1e-9);
    }

    #[test]
    fn table_resolves_labels() {
        let table: LocationTable = [("eu-central".to_string(), FRANKFURT)].into_iter().collect();
        assert_eq!(table.resolve("eu-central"), Some(FRANKFURT));
        assert_eq!(table.resolve("mars"), None);
        assert_eq!(table.len(), 1);
    }
}
