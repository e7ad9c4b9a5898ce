//! Haversine distance between two points. §4.A.

use crate::errors::{QueueError, QueueResult};
use crate::models::GeoPoint;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

fn validate(p: &GeoPoint) -> QueueResult<()> {
    if !(-90.0..=90.0).contains(&p.latitude) || !(-180.0..=180.0).contains(&p.longitude) {
        return Err(QueueError::InvalidCoordinates);
    }
    if let Some(acc) = p.accuracy {
        if !(0.0..=1000.0).contains(&acc) {
            return Err(QueueError::InvalidCoordinates);
        }
    }
    Ok(())
}

/// Haversine great-circle distance in meters, rounded to the nearest meter.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> QueueResult<u32> {
    validate(a)?;
    validate(b)?;

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let sin_dlat_2 = (dlat / 2.0).sin();
    let sin_dlon_2 = (dlon / 2.0).sin();

    let h = sin_dlat_2 * sin_dlat_2 + lat1.cos() * lat2.cos() * sin_dlon_2 * sin_dlon_2;
    let c = 2.0 * h.sqrt().asin();
    let meters = EARTH_RADIUS_METERS * c;

    Ok(meters.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint {
            latitude: lat,
            longitude: lon,
            accuracy: None,
        }
    }

    #[test]
    fn zero_distance_for_identical_points() {
        let p = pt(12.9716, 77.5946);
        assert_eq!(distance_meters(&p, &p).unwrap(), 0);
    }

    #[test]
    fn tiny_offset_within_auto_range() {
        // scenario 1: ~2 m apart
        let a = pt(12.9716, 77.5946);
        let b = pt(12.97162, 77.59461);
        let d = distance_meters(&a, &b).unwrap();
        assert!(d <= 5, "expected a couple meters, got {d}");
    }

    #[test]
    fn medium_offset_around_900m() {
        // scenario 2: ~935 m apart
        let a = pt(12.9716, 77.5946);
        let b = pt(12.9800, 77.5946);
        let d = distance_meters(&a, &b).unwrap();
        assert!((900..1000).contains(&d), "expected ~935m, got {d}");
    }

    #[test]
    fn rejects_out_of_bounds_latitude() {
        let a = pt(91.0, 0.0);
        let b = pt(0.0, 0.0);
        assert!(matches!(
            distance_meters(&a, &b),
            Err(QueueError::InvalidCoordinates)
        ));
    }

    #[test]
    fn rejects_out_of_bounds_longitude() {
        let a = pt(0.0, 181.0);
        let b = pt(0.0, 0.0);
        assert!(matches!(
            distance_meters(&a, &b),
            Err(QueueError::InvalidCoordinates)
        ));
    }

    #[test]
    fn rejects_accuracy_out_of_range() {
        let a = GeoPoint { latitude: 0.0, longitude: 0.0, accuracy: Some(1001.0) };
        let b = pt(0.0, 0.0);
        assert!(matches!(
            distance_meters(&a, &b),
            Err(QueueError::InvalidCoordinates)
        ));
    }
}
