//! Conversion of projected grid coordinates to the WGS84 latitude/longitude
//! pairs the Places API expects.
//!
//! Region polygons arrive in the British National Grid (EPSG:27700). Grid
//! points are reprojected with the Ordnance Survey inverse transverse Mercator
//! formulae followed by a seven-parameter Helmert shift from OSGB36 to WGS84,
//! which is accurate to a few metres and plenty for choosing search origins.

use geo::Coord;

use crate::grid::SamplePoint;

/// Maps a coordinate in a projected CRS to a geographic sample point.
pub trait Reproject: Send + Sync {
    fn to_geographic(&self, coord: Coord<f64>) -> SamplePoint;
}

/// Treats `x` as longitude and `y` as latitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Reproject for Identity {
    fn to_geographic(&self, coord: Coord<f64>) -> SamplePoint {
        SamplePoint {
            lat: coord.y,
            lng: coord.x,
        }
    }
}

/// EPSG:27700 easting/northing to EPSG:4326.
#[derive(Debug, Clone, Copy, Default)]
pub struct BritishNationalGrid;

impl Reproject for BritishNationalGrid {
    fn to_geographic(&self, coord: Coord<f64>) -> SamplePoint {
        let (lat, lon) = national_grid_to_osgb36(coord.x, coord.y);
        let osgb36 = geodetic_to_cartesian(lat, lon, &AIRY_1830);
        let wgs84 = helmert_osgb36_to_wgs84(osgb36);
        let (lat, lon) = cartesian_to_geodetic(wgs84, &WGS84);
        SamplePoint {
            lat: lat.to_degrees(),
            lng: lon.to_degrees(),
        }
    }
}

struct Ellipsoid {
    a: f64,
    b: f64,
}

impl Ellipsoid {
    fn eccentricity_squared(&self) -> f64 {
        (self.a * self.a - self.b * self.b) / (self.a * self.a)
    }
}

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    b: 6_356_752.314_245,
};

// National Grid true origin and scale factor on the central meridian.
const F0: f64 = 0.999_601_271_7;
const PHI0_DEG: f64 = 49.0;
const LAMBDA0_DEG: f64 = -2.0;
const E0: f64 = 400_000.0;
const N0: f64 = -100_000.0;

// OSGB36 -> WGS84: translation (m), scale (ppm), rotation (arc seconds).
const TX: f64 = 446.448;
const TY: f64 = -125.157;
const TZ: f64 = 542.060;
const SCALE_PPM: f64 = -20.4894;
const RX_SEC: f64 = 0.1502;
const RY_SEC: f64 = 0.2470;
const RZ_SEC: f64 = 0.8421;

const MAX_ITERATIONS: usize = 32;

/// Returns OSGB36 (latitude, longitude) in radians.
fn national_grid_to_osgb36(easting: f64, northing: f64) -> (f64, f64) {
    let Ellipsoid { a, b } = AIRY_1830;
    let e2 = AIRY_1830.eccentricity_squared();
    let n = (a - b) / (a + b);
    let phi0 = PHI0_DEG.to_radians();
    let af0 = a * F0;

    let mut phi = (northing - N0) / af0 + phi0;
    let mut m = meridional_arc(phi, phi0, b, n);
    let mut iterations = 0;
    // Iterate until the residual northing is below 0.01 mm.
    while (northing - N0 - m).abs() >= 0.000_01 && iterations < MAX_ITERATIONS {
        phi += (northing - N0 - m) / af0;
        m = meridional_arc(phi, phi0, b, n);
        iterations += 1;
    }

    let sin_phi = phi.sin();
    let denom = 1.0 - e2 * sin_phi * sin_phi;
    let nu = af0 / denom.sqrt();
    let rho = af0 * (1.0 - e2) / denom.powf(1.5);
    let eta2 = nu / rho - 1.0;

    let tan = phi.tan();
    let tan2 = tan * tan;
    let tan4 = tan2 * tan2;
    let tan6 = tan4 * tan2;
    let sec = 1.0 / phi.cos();
    let nu3 = nu * nu * nu;
    let nu5 = nu3 * nu * nu;
    let nu7 = nu5 * nu * nu;

    let vii = tan / (2.0 * rho * nu);
    let viii = tan / (24.0 * rho * nu3) * (5.0 + 3.0 * tan2 + eta2 - 9.0 * tan2 * eta2);
    let ix = tan / (720.0 * rho * nu5) * (61.0 + 90.0 * tan2 + 45.0 * tan4);
    let x = sec / nu;
    let xi = sec / (6.0 * nu3) * (nu / rho + 2.0 * tan2);
    let xii = sec / (120.0 * nu5) * (5.0 + 28.0 * tan2 + 24.0 * tan4);
    let xiia = sec / (5040.0 * nu7) * (61.0 + 662.0 * tan2 + 1320.0 * tan4 + 720.0 * tan6);

    let de = easting - E0;
    let de2 = de * de;
    let de3 = de2 * de;
    let de4 = de2 * de2;
    let de5 = de4 * de;
    let de6 = de3 * de3;
    let de7 = de6 * de;

    let lat = phi - vii * de2 + viii * de4 - ix * de6;
    let lon = LAMBDA0_DEG.to_radians() + x * de - xi * de3 + xii * de5 - xiia * de7;
    (lat, lon)
}

fn meridional_arc(phi: f64, phi0: f64, b: f64, n: f64) -> f64 {
    let n2 = n * n;
    let n3 = n2 * n;
    let diff = phi - phi0;
    let sum = phi + phi0;
    let ma = (1.0 + n + 1.25 * n2 + 1.25 * n3) * diff;
    let mb = (3.0 * n + 3.0 * n2 + 2.625 * n3) * diff.sin() * sum.cos();
    let mc = (1.875 * n2 + 1.875 * n3) * (2.0 * diff).sin() * (2.0 * sum).cos();
    let md = (35.0 / 24.0) * n3 * (3.0 * diff).sin() * (3.0 * sum).cos();
    b * F0 * (ma - mb + mc - md)
}

fn geodetic_to_cartesian(lat: f64, lon: f64, ellipsoid: &Ellipsoid) -> [f64; 3] {
    let e2 = ellipsoid.eccentricity_squared();
    let sin_lat = lat.sin();
    let nu = ellipsoid.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        nu * lat.cos() * lon.cos(),
        nu * lat.cos() * lon.sin(),
        (1.0 - e2) * nu * sin_lat,
    ]
}

fn helmert_osgb36_to_wgs84([x, y, z]: [f64; 3]) -> [f64; 3] {
    let s = 1.0 + SCALE_PPM * 1e-6;
    let rx = (RX_SEC / 3600.0).to_radians();
    let ry = (RY_SEC / 3600.0).to_radians();
    let rz = (RZ_SEC / 3600.0).to_radians();
    [
        TX + s * x - rz * y + ry * z,
        TY + rz * x + s * y - rx * z,
        TZ - ry * x + rx * y + s * z,
    ]
}

fn cartesian_to_geodetic([x, y, z]: [f64; 3], ellipsoid: &Ellipsoid) -> (f64, f64) {
    let e2 = ellipsoid.eccentricity_squared();
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..MAX_ITERATIONS {
        let sin_lat = lat.sin();
        let nu = ellipsoid.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let next = (z + e2 * nu * sin_lat).atan2(p);
        let converged = (next - lat).abs() < 1e-12;
        lat = next;
        if converged {
            break;
        }
    }
    (lat, y.atan2(x))
}
